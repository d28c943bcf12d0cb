// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Library error type for the session-security core.
//!
//! Every variant carries enough context for the internal log line. What the
//! user sees comes from [`SecurityError::user_message`], which never includes
//! backend payloads, identifiers or transport details.

use thiserror::Error;

/// Errors raised by the rate limiter, session, impersonation and backend layers.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Too many failed attempts for an identifier.
    #[error("identifier {identifier} is locked out for another {retry_after_secs}s")]
    RateLimited {
        identifier: String,
        retry_after_secs: u64,
    },

    /// The session already expired; a fresh sign-in is required.
    #[error("session expired")]
    SessionExpired,

    /// A start/end impersonation call is already running for this session.
    #[error("an impersonation request is already in flight")]
    OperationInFlight,

    /// A named RPC returned an error payload or a non-success status.
    #[error("rpc `{name}` failed: {message}")]
    Rpc { name: String, message: String },

    /// The auth service rejected a request.
    #[error("auth service error: {0}")]
    Auth(String),

    /// The backend could not be reached.
    #[error("backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a payload we could not decode.
    #[error("unexpected backend payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A role string did not name any known role.
    #[error("unknown role: {0}")]
    InvalidRole(String),

    /// The backend is not configured (missing URL or key).
    #[error("backend not configured: {0}")]
    NotConfigured(String),
}

impl SecurityError {
    /// Short message suitable for a toast or banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { retry_after_secs, .. } => {
                let minutes = retry_after_secs.div_ceil(60);
                format!(
                    "Too many failed attempts. Please try again in {} minute(s).",
                    minutes.max(1)
                )
            }
            Self::SessionExpired => "Your session has expired. Please sign in again.".to_string(),
            Self::OperationInFlight => {
                "Another impersonation request is still being processed.".to_string()
            }
            Self::Rpc { .. } | Self::Decode(_) => {
                "The server could not complete the request.".to_string()
            }
            Self::Auth(_) => "Authentication failed. Please sign in again.".to_string(),
            Self::Transport(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::InvalidRole(_) => "That role is not recognised.".to_string(),
            Self::NotConfigured(_) => "The service is not configured.".to_string(),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rpc { .. } | Self::RateLimited { .. })
    }
}

/// Result alias for the security core.
pub type SecurityResult<T> = Result<T, SecurityError>;
