// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! REST client for the hosted backend.
//!
//! Speaks the PostgREST-style surface of the hosted service:
//!
//! - `POST {base}/auth/v1/token?grant_type=password` sign-in
//! - `POST {base}/auth/v1/logout` sign-out
//! - `GET  {base}/auth/v1/user` current user
//! - `POST {base}/rest/v1/rpc/{name}` remote procedures
//! - `GET  {base}/rest/v1/profiles?id=eq.{id}&select=role` role lookup
//!
//! Every request carries the `apikey` header. The bearer token is the
//! signed-in user's access token when one is stored, otherwise the anon key.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{AuthService, AuthUser, BackendRpc, ProfileStore};
use crate::error::{SecurityError, SecurityResult};
use crate::security::sign_out::{LocalAuthState, StoredTokens};

/// Default timeout for backend requests (in seconds).
const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    role: Option<String>,
}

/// Client for the hosted auth/database service.
#[derive(Debug, Clone)]
pub struct RestBackend {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    local: Arc<LocalAuthState>,
}

impl RestBackend {
    /// Build a client. Fails when the base URL or key is empty.
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        local: Arc<LocalAuthState>,
    ) -> SecurityResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let anon_key = anon_key.into();

        if base_url.is_empty() {
            return Err(SecurityError::NotConfigured("backend URL is not set".to_string()));
        }
        if anon_key.is_empty() {
            return Err(SecurityError::NotConfigured("backend key is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            base_url,
            anon_key,
            client,
            local,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Local token store shared with the sign-out path.
    pub fn local_state(&self) -> &Arc<LocalAuthState> {
        &self.local
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        let token = self
            .local
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        format!("Bearer {}", token)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", self.bearer())
    }

    /// Password sign-in. Stores the returned tokens locally.
    ///
    /// Rejected credentials map to [`SecurityError::Auth`], which the caller
    /// counts as a failed attempt.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> SecurityResult<AuthUser> {
        let response = self
            .client
            .post(self.auth_url("token?grant_type=password"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_client_error() {
            return Err(SecurityError::Auth(
                extract_message(&body).unwrap_or_else(|| "invalid login credentials".to_string()),
            ));
        }
        if !status.is_success() {
            return Err(SecurityError::Rpc {
                name: "auth.token".to_string(),
                message: extract_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        self.local.store(StoredTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user_id: token.user.id.clone(),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        });

        tracing::info!(user = %token.user.id, "AUTH_SIGN_IN | tokens stored");
        Ok(token.user)
    }
}

/// Turn a response into JSON, mapping non-success statuses to `Rpc` errors.
async fn decode(name: &str, response: reqwest::Response) -> SecurityResult<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = extract_message(&body).unwrap_or_else(|| status.to_string());
        tracing::debug!(rpc = %name, status = %status, "backend call failed");
        return Err(SecurityError::Rpc {
            name: name.to_string(),
            message,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Pull a human-readable message out of a backend error body.
fn extract_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl AuthService for RestBackend {
    async fn sign_out(&self) -> SecurityResult<()> {
        if !self.local.is_signed_in() {
            return Ok(());
        }
        let response = self
            .request(reqwest::Method::POST, &self.auth_url("logout"))
            .send()
            .await?;
        decode("auth.logout", response).await.map(|_| ())
    }

    async fn current_user(&self) -> SecurityResult<Option<AuthUser>> {
        if !self.local.is_signed_in() {
            return Ok(None);
        }
        let response = self
            .request(reqwest::Method::GET, &self.auth_url("user"))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let value = decode("auth.user", response).await?;
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[async_trait]
impl BackendRpc for RestBackend {
    async fn rpc(&self, name: &str, params: Value) -> SecurityResult<Value> {
        let params = if params.is_null() { json!({}) } else { params };
        let response = self
            .request(reqwest::Method::POST, &self.rest_url(&format!("rpc/{}", name)))
            .json(&params)
            .send()
            .await?;
        decode(name, response).await
    }
}

#[async_trait]
impl ProfileStore for RestBackend {
    async fn fetch_role(&self, user_id: &str) -> SecurityResult<Option<String>> {
        let response = self
            .request(reqwest::Method::GET, &self.rest_url("profiles"))
            .query(&[("id", format!("eq.{}", user_id)), ("select", "role".to_string())])
            .send()
            .await?;

        let value = decode("profiles.select", response).await?;
        let rows: Vec<ProfileRow> = match value {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };
        Ok(rows.into_iter().next().and_then(|row| row.role))
    }
}
