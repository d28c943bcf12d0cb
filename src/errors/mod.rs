// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User-facing errors for the proxy endpoints.
//!
//! Responses never carry:
//! - Upstream response bodies or provider names
//! - API keys, bearer tokens, file paths or IP addresses
//! - Email addresses of the people involved
//!
//! Each error carries a reference code (`ERR-YYYYMMDD-XXXXXX`) that also
//! appears in the internal log line holding the full, sanitized detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::cloud::ProviderError;
use crate::error::SecurityError;

/// Characters used in reference codes. No 0/O or 1/I.
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// `ERR-YYYYMMDD-XXXXXX`, e.g. `ERR-20250115-A3F8K2`.
pub fn generate_reference_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .filter_map(|_| REFERENCE_ALPHABET.choose(&mut rng))
        .map(|&b| b as char)
        .collect();
    format!("ERR-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

/// What went wrong, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input (400)
    InvalidRequest,
    /// Too many attempts for this identifier (429)
    RateLimited,
    /// Upstream or internal failure (500). Never exposes details.
    InternalError,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserError {
    #[serde(rename = "error_type")]
    kind: ErrorKind,
    message: String,
    reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a UserError,
    status: u16,
}

impl UserError {
    /// 400 naming the offending field. `internal_details` is logged, never returned.
    pub fn invalid_request(user_message: &str, field: Option<&str>, internal_details: Option<&str>) -> Self {
        let reference = generate_reference_code();
        if let Some(details) = internal_details {
            tracing::warn!(
                reference = %reference,
                field = ?field,
                details = %sanitize_error_details(details),
                "REQUEST_REJECTED"
            );
        }
        Self {
            kind: ErrorKind::InvalidRequest,
            message: user_message.to_string(),
            reference,
            field: field.map(str::to_string),
        }
    }

    /// 400 for a required field that is absent or blank.
    pub fn missing_field(field: &str) -> Self {
        Self::invalid_request(&format!("Missing required field: {}", field), Some(field), None)
    }

    /// 429 carrying the limiter's user-facing text.
    pub fn rate_limited(err: &SecurityError) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: err.user_message(),
            reference: generate_reference_code(),
            field: None,
        }
    }

    /// 500 with an opaque message; the cause goes to the log only.
    pub fn internal_error(cause: &str) -> Self {
        let reference = generate_reference_code();
        tracing::error!(
            reference = %reference,
            cause = %sanitize_error_details(cause),
            "REQUEST_FAILED"
        );
        Self {
            kind: ErrorKind::InternalError,
            message: format!("Something went wrong on our side. Reference: {}", reference),
            reference,
            field: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: &self,
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ProviderError> for UserError {
    fn from(err: ProviderError) -> Self {
        UserError::internal_error(&err.to_string())
    }
}

/// Handler result.
pub type ApiResult<T> = Result<T, UserError>;

// ============================================================================
// SANITIZATION
// ============================================================================

static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(?:postgres(?:ql)?|mysql|redis)://\S+", "[DB_URL]"),
        (r"/(?:home|root|tmp|var|etc|opt|usr)/\S+", "[PATH]"),
        (r"[A-Za-z]:\\\S+", "[PATH]"),
        (r"\b(?:\d{1,3}\.){3}\d{1,3}\b", "[IP]"),
        (r"eyJ[\w-]+\.[\w-]+\.[\w-]+", "[JWT]"),
        (r"(?i)bearer\s+[\w\-.~+/]+=*", "Bearer [TOKEN]"),
        (r"\bsk-(?:or-)?[\w-]{20,}", "[API_KEY]"),
        (r"\bre_\w{16,}", "[API_KEY]"),
        (r"(?i)\bkey=[\w-]{16,}", "key=[API_KEY]"),
        (r"[\w.%+-]+@[\w.-]+\.[A-Za-z]{2,}", "[EMAIL]"),
        (r"\b[A-Za-z0-9]{40,}\b", "[SECRET]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("sanitize pattern must compile"),
            replacement,
        )
    })
    .collect()
});

/// Strip secrets, personal data and host details from an error string.
pub fn sanitize_error_details(error: &str) -> String {
    SANITIZE_PATTERNS
        .iter()
        .fold(error.to_string(), |text, (pattern, replacement)| {
            pattern.replace_all(&text, *replacement).into_owned()
        })
}
