// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upstream provider clients used by the proxy endpoints.
//!
//! - [`OpenRouterClient`] - chat completions (OpenAI-compatible API)
//! - [`mail::MailClient`] - transactional email (Resend)
//! - [`translate::TranslateClient`] - text translation (Google Translate v2)
//!
//! All three share [`send_with_retry`]: transient failures (network errors,
//! HTTP 429, HTTP 5xx) are retried with exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use campusgate::cloud::{Message, OpenRouterClient};
//!
//! # async fn example() -> Result<(), campusgate::cloud::ProviderError> {
//! let client = OpenRouterClient::with_api_key("sk-or-...")?;
//! let reply = client
//!     .chat("openrouter/auto", vec![Message::user("Explain photosynthesis.")])
//!     .await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

pub mod mail;
pub mod translate;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Default OpenRouter API endpoint.
const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";

/// Default timeout for API requests (in seconds).
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum attempts for transient errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Maximum delay for exponential backoff (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 10000;

/// Errors from upstream providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No credentials configured for the provider.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    /// The provider rejected our credentials.
    #[error("{provider} rejected the API key")]
    Auth { provider: &'static str },
    /// Still rate limited after retries.
    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: &'static str },
    /// Non-success status.
    #[error("{provider} returned HTTP {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    /// Connection or timeout failure.
    #[error("network error talking to {provider}: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },
    /// The response did not have the expected shape.
    #[error("unexpected response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

/// Chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Build the shared HTTP client.
pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| ProviderError::Network {
            provider: "http",
            message: e.to_string(),
        })
}

/// Backoff before attempt `attempt` (1-based retries): 1000ms, 2000ms, ... capped at 10s.
fn backoff_delay(attempt: u32) -> Duration {
    let delay = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(delay.min(RETRY_MAX_DELAY_MS))
}

/// Send a request, retrying transient failures.
///
/// `build` is called once per attempt. Returns the first successful response.
pub(crate) async fn send_with_retry<F>(
    provider: &'static str,
    build: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            tracing::debug!(provider, "Retry attempt {} after {:?} delay", attempt + 1, delay);
            sleep(delay).await;
        }

        let response = match build().send().await {
            Ok(resp) => resp,
            Err(e) => {
                let message = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                last_error = Some(ProviderError::Network { provider, message });
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();

        match code {
            401 | 403 => return Err(ProviderError::Auth { provider }),
            429 => {
                last_error = Some(ProviderError::RateLimited { provider });
            }
            500..=599 => {
                last_error = Some(ProviderError::Api {
                    provider,
                    status: code,
                    body,
                });
            }
            _ => {
                return Err(ProviderError::Api {
                    provider,
                    status: code,
                    body,
                })
            }
        }
    }

    Err(last_error.unwrap_or(ProviderError::Api {
        provider,
        status: 0,
        body: "max retries exceeded".to_string(),
    }))
}

// ============================================================================
// CHAT
// ============================================================================

/// Result of a chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Client for OpenRouter chat completions.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    site_name: Option<String>,
}

impl OpenRouterClient {
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("OpenRouter"));
        }
        Ok(Self {
            api_key,
            base_url: DEFAULT_OPENROUTER_URL.to_string(),
            client: http_client()?,
            site_name: Some("campusgate".to_string()),
        })
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion with automatic retry and exponential backoff.
    pub async fn chat(&self, model: &str, messages: Vec<Message>) -> Result<ChatCompletion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        let response = send_with_retry("OpenRouter", || {
            let mut request = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body);
            if let Some(ref site_name) = self.site_name {
                request = request.header("X-Title", site_name);
            }
            request
        })
        .await?;

        let parsed: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "OpenRouter",
                    message: e.to_string(),
                })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: "OpenRouter",
                message: "no choices in response".to_string(),
            })?;

        let (prompt_tokens, completion_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(ChatCompletion {
            content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            prompt_tokens,
            completion_tokens,
        })
    }
}

/// Model constants for OpenRouter.
pub mod models {
    /// Auto-router - OpenRouter picks the model.
    pub const AUTO: &str = "openrouter/auto";
}
