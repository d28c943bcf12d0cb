// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Email endpoints: `POST /send-email`, `POST /verify-email` and
//! `POST /verify-email/issue`.
//!
//! Without a Resend key the service runs log-only: messages are recorded in
//! the log and reported as sent with id `log-only`.
//!
//! Code checks are throttled per email with the sign-in [`RateLimiter`]
//! rules; the lockout also revokes the pending code.
//!
//! [`RateLimiter`]: crate::security::RateLimiter

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{json_body, required, AppState};
use crate::cloud::mail::OutgoingEmail;
use crate::errors::{ApiResult, UserError};
use crate::security::rate_limiter::mask_identifier;

/// Message id reported when no mail provider is configured.
pub const LOG_ONLY_ID: &str = "log-only";

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendEmailResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyEmailResponse {
    pub valid: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct IssueCodeRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCodeResponse {
    pub success: bool,
    pub expires_at: DateTime<Utc>,
}

/// Deliver through the provider, or log when none is configured.
async fn deliver(state: &AppState, email: OutgoingEmail) -> ApiResult<String> {
    match state.mail.as_ref() {
        Some(client) => Ok(client.send(&email).await?),
        None => {
            let recipients: Vec<String> = email.to.iter().map(|r| mask_identifier(r)).collect();
            tracing::info!(
                to = ?recipients,
                subject = %email.subject,
                "EMAIL_LOG_ONLY: no mail provider configured"
            );
            Ok(LOG_ONLY_ID.to_string())
        }
    }
}

pub async fn send_email(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> ApiResult<Json<SendEmailResponse>> {
    let request = json_body(payload)?;
    let to = required(request.to, "to")?;
    let subject = required(request.subject, "subject")?;
    let html = required(request.html, "html")?;

    let email = OutgoingEmail {
        from: state.email_from.clone(),
        to: vec![to],
        subject,
        html,
        text: request.text.filter(|t| !t.trim().is_empty()),
    };

    let id = deliver(&state, email).await?;
    Ok(Json(SendEmailResponse { success: true, id }))
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> ApiResult<Json<VerifyEmailResponse>> {
    let request = json_body(payload)?;
    let email = required(request.email, "email")?;
    let code = required(request.code, "code")?;
    let now = Utc::now();

    state.verify_limiter.guard_at(&email, now).map_err(|e| {
        tracing::warn!(email = %mask_identifier(&email), "EMAIL_VERIFICATION_BLOCKED");
        UserError::rate_limited(&e)
    })?;

    let outcome = state.store.verify_code_at(&email, &code, now);
    tracing::info!(
        email = %mask_identifier(&email),
        outcome = ?outcome,
        "EMAIL_VERIFICATION"
    );

    state
        .verify_limiter
        .record_attempt_at(&email, !outcome.is_valid(), now);
    if state.verify_limiter.is_blocked_at(&email, now) && state.store.revoke_code(&email) {
        tracing::warn!(
            email = %mask_identifier(&email),
            "EMAIL_VERIFICATION | code revoked after repeated wrong guesses"
        );
    }

    Ok(Json(VerifyEmailResponse {
        valid: outcome.is_valid(),
        message: outcome.message().to_string(),
    }))
}

fn verification_email(from: &str, to: &str, code: &str) -> OutgoingEmail {
    OutgoingEmail {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: "Your verification code".to_string(),
        html: format!(
            "<p>Your verification code is <strong>{code}</strong>.</p>\
             <p>It expires in 10 minutes. If you did not request it, you can ignore this email.</p>"
        ),
        text: Some(format!(
            "Your verification code is {code}. It expires in 10 minutes."
        )),
    }
}

pub async fn issue_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IssueCodeRequest>, JsonRejection>,
) -> ApiResult<Json<IssueCodeResponse>> {
    let request = json_body(payload)?;
    let email = required(request.email, "email")?;
    if !email.contains('@') {
        return Err(UserError::invalid_request(
            "Invalid email address",
            Some("email"),
            None,
        ));
    }

    let (code, expires_at) = state.store.issue_code_at(&email, Utc::now());
    if state.mail.is_none() {
        // Development mode: the code is only reachable through the log.
        tracing::debug!(email = %mask_identifier(&email), code = %code, "verification code (log-only)");
    }
    deliver(&state, verification_email(&state.email_from, &email, &code)).await?;

    Ok(Json(IssueCodeResponse {
        success: true,
        expires_at,
    }))
}
