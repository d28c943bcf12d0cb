// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session security.
//!
//! ## Components
//!
//! - **Rate limiting**: failed credential submissions per identifier, with lockout
//! - **Session timeout**: Active → Warning → Expired from inactivity
//! - **Activity tracking**: interaction signals reset the inactivity clock
//! - **Sign-out**: single path for every session-ending condition
//! - **Impersonation**: admins acting as another account
//!
//! [`SecurityServices`] wires them together around one set of backend
//! collaborators.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use campusgate::backend::Collaborators;
//! use campusgate::security::{LocalAuthState, SecurityServices};
//!
//! # async fn example() -> campusgate::error::SecurityResult<()> {
//! let services = SecurityServices::new(
//!     Collaborators::offline(),
//!     Arc::new(LocalAuthState::new()),
//!     Default::default(),
//!     Default::default(),
//!     None,
//! );
//!
//! let session = services.begin_session("user-123");
//! session.record_activity();
//! let redirect = services.resolve_navigation(Some("student"), "/admin-dashboard").await;
//! assert_eq!(redirect, Some("/student-dashboard"));
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod impersonation;
pub mod locks;
pub mod monitor;
pub mod rate_limiter;
pub mod session_manager;
pub mod sign_out;

pub use activity::{InteractionEvent, InteractionKind, SessionActivityTracker};
pub use impersonation::{ImpersonationContext, ImpersonationController};
pub use locks::{resilient_read, resilient_write};
pub use monitor::SessionMonitor;
pub use rate_limiter::{RateLimitConfig, RateLimitRecord, RateLimiter};
pub use session_manager::{
    Session, SessionConfig, SessionEvent, SessionState, SessionTimeoutStateMachine, Transition,
    SESSION_TIMEOUT_SECS, WARNING_LEAD_SECS,
};
pub use sign_out::{LocalAuthState, SignOutOutcome, SignOutReason, SignOutService, StoredTokens};

use serde_json::json;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::audit::{SecurityAuditLog, SecurityEventType};
use crate::backend::{select_role, Collaborators, Notifier, TracingNotifier};
use crate::error::{SecurityError, SecurityResult};
use crate::router::{can_access_route, get_redirect_route, resolve_route, AUTH_ROUTE};
use rate_limiter::mask_identifier;

/// The assembled security services for one client.
pub struct SecurityServices {
    collaborators: Collaborators,
    rate_limiter: Arc<RateLimiter>,
    audit: Arc<SecurityAuditLog>,
    impersonation: Arc<ImpersonationController>,
    sign_out: SignOutService,
    notifier: Arc<dyn Notifier>,
    session_config: SessionConfig,
    session: RwLock<Option<Arc<SessionTimeoutStateMachine>>>,
}

impl SecurityServices {
    /// Build the services. `notifier` defaults to [`TracingNotifier`].
    pub fn new(
        collaborators: Collaborators,
        local: Arc<LocalAuthState>,
        session_config: SessionConfig,
        rate_limit: RateLimitConfig,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let notifier = notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let audit = Arc::new(SecurityAuditLog::new(collaborators.rpc.clone()));
        let impersonation = Arc::new(ImpersonationController::new(
            collaborators.rpc.clone(),
            audit.clone(),
            notifier.clone(),
        ));
        let sign_out = SignOutService::new(collaborators.auth.clone(), local)
            .with_impersonation(impersonation.clone());

        Self {
            collaborators,
            rate_limiter: Arc::new(RateLimiter::new(rate_limit)),
            audit,
            impersonation,
            sign_out,
            notifier,
            session_config: session_config.validated(),
            session: RwLock::new(None),
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn audit(&self) -> &Arc<SecurityAuditLog> {
        &self.audit
    }

    pub fn impersonation(&self) -> &Arc<ImpersonationController> {
        &self.impersonation
    }

    pub fn local_state(&self) -> &Arc<LocalAuthState> {
        self.sign_out.local_state()
    }

    /// Session machine for the signed-in user, if any.
    pub fn session(&self) -> Option<Arc<SessionTimeoutStateMachine>> {
        resilient_read(&self.session).clone()
    }

    /// Start a fresh session after a successful sign-in.
    ///
    /// A session it replaces is terminated so its poller can no longer sign
    /// anyone out, and any impersonation cached for it is dropped.
    pub fn begin_session(&self, user_id: &str) -> Arc<SessionTimeoutStateMachine> {
        let machine = Arc::new(SessionTimeoutStateMachine::new(
            self.session_config.clone(),
            user_id,
            self.audit.clone(),
            self.sign_out.clone(),
            self.notifier.clone(),
        ));
        let replaced = resilient_write(&self.session).replace(machine.clone());
        if let Some(old) = replaced {
            old.terminate();
        }
        self.impersonation.clear_local();
        machine
    }

    /// Start the poller and activity subscription for the current session.
    pub fn start_monitor(&self, events: mpsc::Receiver<InteractionEvent>) -> Option<SessionMonitor> {
        self.session().map(|session| SessionMonitor::start(session, events))
    }

    /// Run a credential submission behind the rate limiter.
    ///
    /// Only [`SecurityError::Auth`] (rejected credentials) counts as a failed
    /// attempt; transport and backend failures leave the counter alone.
    pub async fn attempt_sign_in<F, Fut, T>(&self, identifier: &str, attempt: F) -> SecurityResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SecurityResult<T>>,
    {
        let masked = mask_identifier(identifier);

        if let Err(e) = self.rate_limiter.guard(identifier) {
            self.audit
                .log(
                    SecurityEventType::LoginFailed,
                    json!({ "identifier": masked, "reason": "rate_limited" }),
                    None,
                )
                .await;
            self.notifier.notify(
                crate::backend::NoticeLevel::Warning,
                "Sign-in blocked",
                &e.user_message(),
            );
            return Err(e);
        }

        match attempt().await {
            Ok(value) => {
                self.rate_limiter.record_attempt(identifier, false);
                self.audit
                    .log(
                        SecurityEventType::LoginSucceeded,
                        json!({ "identifier": masked }),
                        None,
                    )
                    .await;
                Ok(value)
            }
            Err(e @ SecurityError::Auth(_)) => {
                self.rate_limiter.record_attempt(identifier, true);
                if self.rate_limiter.is_blocked(identifier) {
                    let retry = self.rate_limiter.block_time_remaining(identifier);
                    self.audit
                        .log(
                            SecurityEventType::AccountLocked,
                            json!({ "identifier": masked, "blocked_for_secs": retry.as_secs() }),
                            None,
                        )
                        .await;
                } else {
                    self.audit
                        .log(
                            SecurityEventType::LoginFailed,
                            json!({ "identifier": masked, "reason": "invalid_credentials" }),
                            None,
                        )
                        .await;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// User-initiated sign-out.
    ///
    /// The session is terminated before the remote call, so a monitor still
    /// holding it stops without running the timeout path.
    pub async fn sign_out(&self) -> SignOutOutcome {
        let ended = resilient_write(&self.session).take();
        if let Some(session) = &ended {
            session.terminate();
        }
        let actor = ended.as_ref().map(|s| s.snapshot().user_id);
        self.audit
            .log(
                SecurityEventType::SignOut,
                json!({ "reason": SignOutReason::UserRequested }),
                actor.as_deref(),
            )
            .await;
        self.sign_out.sign_out(SignOutReason::UserRequested).await
    }

    /// Role stored for a user ("student" when there is no profile).
    pub async fn current_role(&self, user_id: &str) -> SecurityResult<String> {
        select_role(self.collaborators.profiles.as_ref(), user_id).await
    }

    /// Role navigation should use: the impersonated one while active.
    pub fn effective_role(&self, own_role: Option<&str>) -> Option<String> {
        self.impersonation.effective_role(own_role)
    }

    /// Landing route after sign-in.
    pub fn landing_route(&self, own_role: Option<&str>) -> &'static str {
        resolve_route(self.effective_role(own_role).as_deref(), true)
    }

    /// Redirect for a navigation to `current_route`, using the effective role.
    ///
    /// Denied navigations are audited.
    pub async fn resolve_navigation(
        &self,
        own_role: Option<&str>,
        current_route: &str,
    ) -> Option<&'static str> {
        let role = self.effective_role(own_role);
        let redirect = get_redirect_route(role.as_deref(), current_route);

        if let (Some(role), Some(target)) = (role.as_deref(), redirect) {
            if target != AUTH_ROUTE && !can_access_route(Some(role), current_route) {
                self.audit
                    .log(
                        SecurityEventType::RouteDenied,
                        json!({ "role": role, "route": current_route, "redirect_to": target }),
                        None,
                    )
                    .await;
            }
        }

        redirect
    }

    /// Called when the client resumes from a suspended state.
    ///
    /// Re-checks the impersonation record and evaluates the session at once
    /// instead of waiting for the next poll.
    pub async fn on_resume(&self) -> Option<Transition> {
        if let Err(e) = self.impersonation.check_impersonation_status().await {
            tracing::warn!(error = %e, "impersonation check on resume failed");
        }
        match self.session() {
            Some(session) => Some(session.poll().await),
            None => None,
        }
    }
}
