// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backend collaborators.
//!
//! Persistence, authentication and the durable audit log live in a hosted
//! backend-as-a-service. The security core only talks to it through the
//! traits in this module, so tests can substitute in-memory fakes and the
//! binary can plug in [`rest::RestBackend`].
//!
//! | Trait          | Operations                                   |
//! |----------------|----------------------------------------------|
//! | [`AuthService`]  | `sign_out`, `current_user`                 |
//! | [`BackendRpc`]   | named remote procedures with JSON params   |
//! | [`ProfileStore`] | role lookup for a user id                  |
//! | [`Notifier`]     | user-facing toast / banner messages        |

pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{SecurityError, SecurityResult};
use crate::router::Role;

pub use rest::RestBackend;

// ============================================================================
// RPC NAMES
// ============================================================================

pub const RPC_GET_IMPERSONATION_CONTEXT: &str = "get_impersonation_context";
pub const RPC_START_IMPERSONATION: &str = "start_impersonation";
pub const RPC_END_IMPERSONATION: &str = "end_impersonation";
pub const RPC_LOG_SECURITY_EVENT: &str = "log_security_event";

// ============================================================================
// TRAITS
// ============================================================================

/// The signed-in account as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Hosted authentication service.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Revoke the current session on the server.
    async fn sign_out(&self) -> SecurityResult<()>;

    /// The currently signed-in user, `None` when there is no valid session.
    async fn current_user(&self) -> SecurityResult<Option<AuthUser>>;
}

/// Named remote procedure calls.
#[async_trait]
pub trait BackendRpc: Send + Sync {
    async fn rpc(&self, name: &str, params: Value) -> SecurityResult<Value>;
}

/// Read access to account profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Raw role value stored for the user, `None` when there is no profile row.
    async fn fetch_role(&self, user_id: &str) -> SecurityResult<Option<String>>;
}

/// Role for a user, defaulting to "student" when no profile row exists.
pub async fn select_role(profiles: &dyn ProfileStore, user_id: &str) -> SecurityResult<String> {
    Ok(profiles
        .fetch_role(user_id)
        .await?
        .filter(|role| !role.trim().is_empty())
        .unwrap_or_else(|| Role::Student.as_str().to_string()))
}

// ============================================================================
// NOTIFIER
// ============================================================================

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Shows short messages to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, title: &str, body: &str);
}

/// Default notifier: writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, title: &str, body: &str) {
        match level {
            NoticeLevel::Info => tracing::info!(title = %title, "NOTICE | {}", body),
            NoticeLevel::Warning => tracing::warn!(title = %title, "NOTICE | {}", body),
            NoticeLevel::Error => tracing::error!(title = %title, "NOTICE | {}", body),
        }
    }
}

// ============================================================================
// WIRING
// ============================================================================

/// The backend collaborators the security services are built from.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthService>,
    pub rpc: Arc<dyn BackendRpc>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl Collaborators {
    /// Use one REST backend for every role.
    pub fn from_rest(backend: Arc<RestBackend>) -> Self {
        Self {
            auth: backend.clone(),
            rpc: backend.clone(),
            profiles: backend,
        }
    }

    /// Collaborators for running without a configured backend.
    pub fn offline() -> Self {
        let backend = Arc::new(OfflineBackend);
        Self {
            auth: backend.clone(),
            rpc: backend.clone(),
            profiles: backend,
        }
    }
}

/// Backend used when none is configured.
///
/// Sign-out succeeds, there is never a current user or profile, the audit
/// RPC and the impersonation lookup answer `null`, and every other RPC
/// fails with [`SecurityError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

#[async_trait]
impl AuthService for OfflineBackend {
    async fn sign_out(&self) -> SecurityResult<()> {
        Ok(())
    }

    async fn current_user(&self) -> SecurityResult<Option<AuthUser>> {
        Ok(None)
    }
}

#[async_trait]
impl BackendRpc for OfflineBackend {
    async fn rpc(&self, name: &str, _params: Value) -> SecurityResult<Value> {
        match name {
            RPC_LOG_SECURITY_EVENT | RPC_GET_IMPERSONATION_CONTEXT => Ok(Value::Null),
            other => Err(SecurityError::NotConfigured(format!(
                "rpc `{}` requires a backend",
                other
            ))),
        }
    }
}

#[async_trait]
impl ProfileStore for OfflineBackend {
    async fn fetch_role(&self, _user_id: &str) -> SecurityResult<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProfile(Option<&'static str>);

    #[async_trait]
    impl ProfileStore for FixedProfile {
        async fn fetch_role(&self, _user_id: &str) -> SecurityResult<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    #[tokio::test]
    async fn test_select_role_defaults_to_student() {
        assert_eq!(select_role(&FixedProfile(None), "u1").await.unwrap(), "student");
        assert_eq!(select_role(&FixedProfile(Some("  ")), "u1").await.unwrap(), "student");
        assert_eq!(
            select_role(&FixedProfile(Some("educator+admin")), "u1").await.unwrap(),
            "educator+admin"
        );
    }

    #[tokio::test]
    async fn test_offline_backend() {
        let c = Collaborators::offline();
        assert!(c.auth.sign_out().await.is_ok());
        assert!(c.auth.current_user().await.unwrap().is_none());
        assert_eq!(
            c.rpc.rpc(RPC_LOG_SECURITY_EVENT, Value::Null).await.unwrap(),
            Value::Null
        );
        assert!(matches!(
            c.rpc.rpc(RPC_START_IMPERSONATION, Value::Null).await,
            Err(SecurityError::NotConfigured(_))
        ));
    }
}
