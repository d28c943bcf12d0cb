// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transactional email through Resend.

use serde::{Deserialize, Serialize};

use super::{http_client, send_with_retry, ProviderError};

const DEFAULT_RESEND_URL: &str = "https://api.resend.com";

/// Outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Resend API client.
#[derive(Debug, Clone)]
pub struct MailClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl MailClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("Resend"));
        }
        Ok(Self {
            api_key,
            base_url: DEFAULT_RESEND_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send an email. Returns the provider's message id.
    pub async fn send(&self, email: &OutgoingEmail) -> Result<String, ProviderError> {
        let url = format!("{}/emails", self.base_url);
        let response = send_with_retry("Resend", || {
            self.client.post(&url).bearer_auth(&self.api_key).json(email)
        })
        .await?;

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: "Resend",
                message: e.to_string(),
            })?;

        tracing::info!(id = %parsed.id, recipients = email.to.len(), "EMAIL_SENT");
        Ok(parsed.id)
    }
}
