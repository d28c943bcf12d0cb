// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sign-out path.
//!
//! Every condition that ends a session (explicit sign-out, inactivity
//! timeout, revoked credentials) goes through [`SignOutService::sign_out`].
//! The remote call may fail; local tokens and the impersonation cache are
//! cleared regardless and the caller is always sent back to the auth route.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

use super::impersonation::ImpersonationController;
use super::locks::{resilient_read, resilient_write};
use crate::backend::AuthService;
use crate::router::AUTH_ROUTE;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    /// The user asked to sign out.
    UserRequested,
    /// Inactivity timeout.
    SessionTimeout,
    /// The backend no longer recognises the session.
    CredentialsRevoked,
}

impl fmt::Display for SignOutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "USER_REQUESTED"),
            Self::SessionTimeout => write!(f, "SESSION_TIMEOUT"),
            Self::CredentialsRevoked => write!(f, "CREDENTIALS_REVOKED"),
        }
    }
}

/// Tokens kept on the client after sign-in.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client-side token store.
#[derive(Debug, Default)]
pub struct LocalAuthState {
    tokens: RwLock<Option<StoredTokens>>,
}

impl LocalAuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, tokens: StoredTokens) {
        *resilient_write(&self.tokens) = Some(tokens);
    }

    /// Drop stored tokens. Returns whether anything was stored.
    pub fn clear(&self) -> bool {
        resilient_write(&self.tokens).take().is_some()
    }

    pub fn is_signed_in(&self) -> bool {
        resilient_read(&self.tokens).is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        resilient_read(&self.tokens)
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        resilient_read(&self.tokens).as_ref().map(|t| t.user_id.clone())
    }
}

/// Result of a sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignOutOutcome {
    pub reason: SignOutReason,
    /// Where the UI should navigate next. Always the auth route.
    pub redirect_to: &'static str,
    /// Whether the backend confirmed the remote sign-out.
    pub remote_confirmed: bool,
}

/// Performs remote sign-out followed by unconditional local cleanup.
#[derive(Clone)]
pub struct SignOutService {
    auth: Arc<dyn AuthService>,
    local: Arc<LocalAuthState>,
    impersonation: Option<Arc<ImpersonationController>>,
}

impl SignOutService {
    pub fn new(auth: Arc<dyn AuthService>, local: Arc<LocalAuthState>) -> Self {
        Self {
            auth,
            local,
            impersonation: None,
        }
    }

    /// Also drop this controller's cached context on every sign-out.
    pub fn with_impersonation(mut self, impersonation: Arc<ImpersonationController>) -> Self {
        self.impersonation = Some(impersonation);
        self
    }

    pub fn local_state(&self) -> &Arc<LocalAuthState> {
        &self.local
    }

    pub async fn sign_out(&self, reason: SignOutReason) -> SignOutOutcome {
        let remote_confirmed = match self.auth.sign_out().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    reason = %reason,
                    error = %e,
                    "SIGN_OUT | remote sign-out failed; clearing local state anyway"
                );
                false
            }
        };

        let had_tokens = self.local.clear();
        if let Some(impersonation) = &self.impersonation {
            impersonation.clear_local();
        }
        tracing::info!(
            reason = %reason,
            remote_confirmed,
            had_tokens,
            "{} | SIGN_OUT | reason={}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            reason
        );

        SignOutOutcome {
            reason,
            redirect_to: AUTH_ROUTE,
            remote_confirmed,
        }
    }
}
