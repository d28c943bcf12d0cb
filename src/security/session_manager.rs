// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session Timeout State Machine
//!
//! Derives `Active → Warning → Expired` from elapsed inactivity.
//!
//! ## Rules
//!
//! - **Warning**: inactivity ≥ timeout − warning lead, issued once per cycle.
//! - **Expired**: inactivity ≥ timeout. Terminal until [`SessionTimeoutStateMachine::reset`].
//! - **Activity**: any tracked interaction or explicit extension sets
//!   `last_activity = now` and clears the warning. Ignored once expired.
//!
//! Entering Expired audits the event, signs out and notifies the user, in that
//! order, exactly once. The transition happens under the session write lock
//! so two racing polls cannot both observe it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::locks::{resilient_read, resilient_write};
use super::sign_out::{SignOutReason, SignOutService};
use crate::audit::{SecurityAuditLog, SecurityEventType};
use crate::backend::{NoticeLevel, Notifier};
use crate::error::{SecurityError, SecurityResult};

/// Inactivity timeout: 30 minutes.
pub const SESSION_TIMEOUT_SECS: u64 = 30 * 60;

/// Warning is shown this long before the timeout: 5 minutes.
pub const WARNING_LEAD_SECS: u64 = 5 * 60;

/// How often the monitor evaluates the session: 60 seconds.
pub const POLL_INTERVAL_SECS: u64 = 60;

/// Upper bound for any configured duration: 10 years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Session state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session is active and valid
    Active,
    /// Session is in warning period (about to expire)
    Warning,
    /// Session has expired and requires a fresh sign-in
    Expired,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Warning)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Warning => write!(f, "WARNING"),
            SessionState::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Session events for the tracing log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Started {
        session_id: String,
        user_id: String,
    },
    WarningIssued {
        session_id: String,
        expires_in_secs: u64,
    },
    Extended {
        session_id: String,
    },
    Expired {
        session_id: String,
        last_activity: DateTime<Utc>,
    },
    ActivityIgnored {
        session_id: String,
    },
}

impl SessionEvent {
    /// Format event for audit log
    pub fn to_audit_string(&self) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        match self {
            SessionEvent::Started { session_id, user_id } => {
                format!("{} | SESSION_STARTED | session={} user={}", timestamp, session_id, user_id)
            }
            SessionEvent::WarningIssued { session_id, expires_in_secs } => {
                format!("{} | SESSION_WARNING | session={} expires_in={}s", timestamp, session_id, expires_in_secs)
            }
            SessionEvent::Extended { session_id } => {
                format!("{} | SESSION_EXTENDED | session={}", timestamp, session_id)
            }
            SessionEvent::Expired { session_id, last_activity } => {
                format!(
                    "{} | SESSION_EXPIRED | session={} last_activity={}",
                    timestamp,
                    session_id,
                    last_activity.to_rfc3339()
                )
            }
            SessionEvent::ActivityIgnored { session_id } => {
                format!("{} | ACTIVITY_AFTER_EXPIRY | session={}", timestamp, session_id)
            }
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity timeout in seconds
    pub timeout_secs: u64,

    /// Seconds before timeout to issue the warning
    pub warning_lead_secs: u64,

    /// Seconds between evaluations
    pub poll_interval_secs: u64,

    /// Warning message template ({minutes} and {seconds} will be replaced)
    pub warning_message_template: String,

    /// Shown after the session expired
    pub expiration_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: SESSION_TIMEOUT_SECS,
            warning_lead_secs: WARNING_LEAD_SECS,
            poll_interval_secs: POLL_INTERVAL_SECS,
            warning_message_template:
                "Your session will expire in {minutes} minute(s) {seconds} second(s) due to inactivity."
                    .to_string(),
            expiration_message: "Your session has expired due to inactivity. Please sign in again."
                .to_string(),
        }
    }
}

impl SessionConfig {
    /// Custom timing with validation.
    ///
    /// The timeout is between one second and [`MAX_DURATION_SECS`]; the
    /// warning lead is clamped below it.
    pub fn custom(timeout_secs: u64, warning_lead_secs: u64) -> Self {
        let timeout = timeout_secs.clamp(1, MAX_DURATION_SECS);
        let lead = warning_lead_secs.min(timeout - 1);

        if lead != warning_lead_secs {
            tracing::warn!(
                "SESSION_TIMEOUT: warning lead {}s is not below timeout {}s. Clamped to {}s.",
                warning_lead_secs,
                timeout,
                lead
            );
        }

        Self {
            timeout_secs: timeout,
            warning_lead_secs: lead,
            ..Self::default()
        }
    }

    /// Re-apply the clamping rules after deserialization.
    pub fn validated(self) -> Self {
        let poll = self.poll_interval_secs.clamp(1, MAX_DURATION_SECS);
        Self {
            poll_interval_secs: poll,
            ..Self::custom(self.timeout_secs, self.warning_lead_secs)
        }
        .with_messages(self.warning_message_template, self.expiration_message)
    }

    fn with_messages(mut self, warning: String, expiration: String) -> Self {
        self.warning_message_template = warning;
        self.expiration_message = expiration;
        self
    }

    fn timeout(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.timeout_secs as i64)
    }

    fn warning_threshold(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.timeout_secs.saturating_sub(self.warning_lead_secs) as i64)
    }

    fn warning_message(&self, remaining_secs: u64) -> String {
        self.warning_message_template
            .replace("{minutes}", &(remaining_secs / 60).to_string())
            .replace("{seconds}", &(remaining_secs % 60).to_string())
    }
}

/// Session record for the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub warning_issued: bool,
    pub expired: bool,
}

impl Session {
    fn new_at(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_session_id(now),
            user_id: user_id.into(),
            created_at: now,
            last_activity: now,
            warning_issued: false,
            expired: false,
        }
    }

    fn inactivity_at(&self, now: DateTime<Utc>) -> ChronoDuration {
        (now - self.last_activity).max(ChronoDuration::zero())
    }
}

fn generate_session_id(now: DateTime<Utc>) -> String {
    let random: u64 = rand::random();
    format!("sess_{}_{:016x}", now.timestamp_millis(), random)
}

/// What a single evaluation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do.
    None,
    /// Active → Warning on this evaluation.
    WarningIssued { expires_in_secs: u64, message: String },
    /// → Expired on this evaluation.
    Expired {
        last_activity: DateTime<Utc>,
        message: String,
    },
}

/// Inactivity state machine for one signed-in session.
pub struct SessionTimeoutStateMachine {
    config: SessionConfig,
    session: RwLock<Session>,
    audit: Arc<SecurityAuditLog>,
    sign_out: SignOutService,
    notifier: Arc<dyn Notifier>,
}

impl SessionTimeoutStateMachine {
    pub fn new(
        config: SessionConfig,
        user_id: impl Into<String>,
        audit: Arc<SecurityAuditLog>,
        sign_out: SignOutService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new_at(config, user_id, audit, sign_out, notifier, Utc::now())
    }

    pub fn new_at(
        config: SessionConfig,
        user_id: impl Into<String>,
        audit: Arc<SecurityAuditLog>,
        sign_out: SignOutService,
        notifier: Arc<dyn Notifier>,
        now: DateTime<Utc>,
    ) -> Self {
        let session = Session::new_at(user_id, now);
        tracing::info!(
            "{}",
            SessionEvent::Started {
                session_id: session.id.clone(),
                user_id: session.user_id.clone(),
            }
            .to_audit_string()
        );
        Self {
            config,
            session: RwLock::new(session),
            audit,
            sign_out,
            notifier,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Copy of the current session record.
    pub fn snapshot(&self) -> Session {
        resilient_read(&self.session).clone()
    }

    pub fn is_expired(&self) -> bool {
        resilient_read(&self.session).expired
    }

    /// State implied by the clock, without applying side effects.
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        let session = resilient_read(&self.session);
        if session.expired {
            return SessionState::Expired;
        }
        let idle = session.inactivity_at(now);
        if idle >= self.config.timeout() {
            SessionState::Expired
        } else if idle >= self.config.warning_threshold() {
            SessionState::Warning
        } else {
            SessionState::Active
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_at(Utc::now())
    }

    /// Seconds until expiry at `now`, zero once expired.
    pub fn time_remaining_secs_at(&self, now: DateTime<Utc>) -> u64 {
        let session = resilient_read(&self.session);
        if session.expired {
            return 0;
        }
        (self.config.timeout() - session.inactivity_at(now))
            .num_seconds()
            .max(0) as u64
    }

    /// Record a tracked interaction. Returns `false` once the session expired.
    pub fn record_activity(&self) -> bool {
        self.record_activity_at(Utc::now())
    }

    pub fn record_activity_at(&self, now: DateTime<Utc>) -> bool {
        let mut session = resilient_write(&self.session);
        if session.expired {
            tracing::debug!(
                "{}",
                SessionEvent::ActivityIgnored {
                    session_id: session.id.clone()
                }
                .to_audit_string()
            );
            return false;
        }
        if now > session.last_activity {
            session.last_activity = now;
        }
        session.warning_issued = false;
        true
    }

    /// Explicit "stay signed in" from the warning prompt.
    pub async fn extend_session(&self) -> SecurityResult<()> {
        self.extend_session_at(Utc::now()).await
    }

    pub async fn extend_session_at(&self, now: DateTime<Utc>) -> SecurityResult<()> {
        if !self.record_activity_at(now) {
            return Err(SecurityError::SessionExpired);
        }
        let session = self.snapshot();
        tracing::info!(
            "{}",
            SessionEvent::Extended {
                session_id: session.id.clone()
            }
            .to_audit_string()
        );
        self.audit
            .log(
                SecurityEventType::SessionExtended,
                json!({ "session_id": session.id }),
                Some(&session.user_id),
            )
            .await;
        Ok(())
    }

    /// Apply the state rules at `now` without side effects beyond the record.
    ///
    /// Expiry fires at most once: the flag is set under the write lock.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> Transition {
        let mut session = resilient_write(&self.session);
        if session.expired {
            return Transition::None;
        }

        let idle = session.inactivity_at(now);

        if idle >= self.config.timeout() {
            session.expired = true;
            session.warning_issued = false;
            tracing::info!(
                "{}",
                SessionEvent::Expired {
                    session_id: session.id.clone(),
                    last_activity: session.last_activity,
                }
                .to_audit_string()
            );
            return Transition::Expired {
                last_activity: session.last_activity,
                message: self.config.expiration_message.clone(),
            };
        }

        if idle >= self.config.warning_threshold() && !session.warning_issued {
            session.warning_issued = true;
            let remaining = (self.config.timeout() - idle).num_seconds().max(0) as u64;
            tracing::warn!(
                "{}",
                SessionEvent::WarningIssued {
                    session_id: session.id.clone(),
                    expires_in_secs: remaining,
                }
                .to_audit_string()
            );
            return Transition::WarningIssued {
                expires_in_secs: remaining,
                message: self.config.warning_message(remaining),
            };
        }

        Transition::None
    }

    /// One poll: evaluate, then run the side effects of any transition.
    pub async fn poll(&self) -> Transition {
        self.poll_at(Utc::now()).await
    }

    pub async fn poll_at(&self, now: DateTime<Utc>) -> Transition {
        let transition = self.evaluate_at(now);
        let session = self.snapshot();

        match &transition {
            Transition::None => {}
            Transition::WarningIssued {
                expires_in_secs,
                message,
            } => {
                self.audit
                    .log(
                        SecurityEventType::SessionWarning,
                        json!({ "session_id": session.id, "expires_in_secs": expires_in_secs }),
                        Some(&session.user_id),
                    )
                    .await;
                self.notifier
                    .notify(NoticeLevel::Warning, "Session expiring", message);
            }
            Transition::Expired {
                last_activity,
                message,
            } => {
                self.audit
                    .log(
                        SecurityEventType::SessionTimeout,
                        json!({
                            "session_id": session.id,
                            "last_activity": last_activity.to_rfc3339(),
                        }),
                        Some(&session.user_id),
                    )
                    .await;
                self.sign_out.sign_out(SignOutReason::SessionTimeout).await;
                self.notifier
                    .notify(NoticeLevel::Error, "Session expired", message);
            }
        }

        transition
    }

    /// End the session without the timeout side effects.
    ///
    /// Used when the session is discarded by a sign-out or replaced by a new
    /// sign-in. Later polls see an expired session and do nothing. Returns
    /// `false` if it had already ended.
    pub fn terminate(&self) -> bool {
        let mut session = resilient_write(&self.session);
        if session.expired {
            return false;
        }
        session.expired = true;
        session.warning_issued = false;
        tracing::info!(
            "{} | SESSION_ENDED | session={}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            session.id
        );
        true
    }

    /// Start a fresh session after sign-in.
    pub fn reset(&self, user_id: impl Into<String>) -> Session {
        self.reset_at(user_id, Utc::now())
    }

    pub fn reset_at(&self, user_id: impl Into<String>, now: DateTime<Utc>) -> Session {
        let fresh = Session::new_at(user_id, now);
        tracing::info!(
            "{}",
            SessionEvent::Started {
                session_id: fresh.id.clone(),
                user_id: fresh.user_id.clone(),
            }
            .to_audit_string()
        );
        *resilient_write(&self.session) = fresh.clone();
        fresh
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthService, AuthUser, BackendRpc};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingAuth {
        sign_outs: AtomicUsize,
    }

    #[async_trait]
    impl AuthService for CountingAuth {
        async fn sign_out(&self) -> SecurityResult<()> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn current_user(&self) -> SecurityResult<Option<AuthUser>> {
            Ok(None)
        }
    }

    struct NullRpc;

    #[async_trait]
    impl BackendRpc for NullRpc {
        async fn rpc(&self, _name: &str, _params: Value) -> SecurityResult<Value> {
            Ok(Value::Null)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(NoticeLevel, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, level: NoticeLevel, _title: &str, body: &str) {
            self.notices.lock().unwrap().push((level, body.to_string()));
        }
    }

    struct Harness {
        machine: SessionTimeoutStateMachine,
        auth: Arc<CountingAuth>,
        audit: Arc<SecurityAuditLog>,
        notifier: Arc<RecordingNotifier>,
        t0: DateTime<Utc>,
    }

    fn harness() -> Harness {
        let t0 = DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let auth = Arc::new(CountingAuth::default());
        let audit = Arc::new(SecurityAuditLog::new(Arc::new(NullRpc)));
        let notifier = Arc::new(RecordingNotifier::default());
        let sign_out = SignOutService::new(auth.clone(), Arc::new(Default::default()));
        let machine = SessionTimeoutStateMachine::new_at(
            SessionConfig::default(),
            "user-1",
            audit.clone(),
            sign_out,
            notifier.clone(),
            t0,
        );
        Harness {
            machine,
            auth,
            audit,
            notifier,
            t0,
        }
    }

    fn mins(m: i64) -> ChronoDuration {
        ChronoDuration::minutes(m)
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Active), "ACTIVE");
        assert_eq!(format!("{}", SessionState::Warning), "WARNING");
        assert_eq!(format!("{}", SessionState::Expired), "EXPIRED");
    }

    #[test]
    fn test_config_clamping() {
        let config = SessionConfig::custom(600, 900);
        assert_eq!(config.timeout_secs, 600);
        assert_eq!(config.warning_lead_secs, 599);

        let config = SessionConfig::custom(0, 0);
        assert_eq!(config.timeout_secs, 1);
        assert_eq!(config.warning_lead_secs, 0);
    }

    #[test]
    fn test_huge_durations_are_clamped() {
        let config = SessionConfig {
            timeout_secs: u64::MAX,
            warning_lead_secs: u64::MAX,
            poll_interval_secs: u64::MAX,
            ..SessionConfig::default()
        }
        .validated();
        assert_eq!(config.timeout_secs, MAX_DURATION_SECS);
        assert_eq!(config.warning_lead_secs, MAX_DURATION_SECS - 1);
        assert_eq!(config.poll_interval_secs, MAX_DURATION_SECS);
        assert!(config.timeout() > ChronoDuration::zero());
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(SESSION_TIMEOUT_SECS, 1800);
        assert_eq!(WARNING_LEAD_SECS, 300);
        assert_eq!(POLL_INTERVAL_SECS, 60);
    }

    #[test]
    fn test_state_progression() {
        let h = harness();
        assert_eq!(h.machine.state_at(h.t0 + mins(10)), SessionState::Active);
        assert_eq!(h.machine.state_at(h.t0 + mins(26)), SessionState::Warning);
        assert_eq!(h.machine.state_at(h.t0 + mins(31)), SessionState::Expired);
        assert_eq!(h.machine.time_remaining_secs_at(h.t0 + mins(26)), 4 * 60);
    }

    #[tokio::test]
    async fn test_warning_issued_once_per_cycle() {
        let h = harness();
        let first = h.machine.poll_at(h.t0 + mins(26)).await;
        assert!(matches!(first, Transition::WarningIssued { expires_in_secs: 240, .. }));
        assert_eq!(h.machine.poll_at(h.t0 + mins(27)).await, Transition::None);
        assert_eq!(h.audit.count_of_type(SecurityEventType::SessionWarning), 1);
        assert_eq!(h.notifier.notices.lock().unwrap()[0].0, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn test_expiry_signs_out_exactly_once() {
        let h = harness();
        h.machine.poll_at(h.t0 + mins(26)).await;
        let t = h.machine.poll_at(h.t0 + mins(31)).await;
        assert!(matches!(t, Transition::Expired { .. }));
        assert_eq!(h.machine.poll_at(h.t0 + mins(32)).await, Transition::None);
        assert_eq!(h.machine.poll_at(h.t0 + mins(60)).await, Transition::None);

        assert_eq!(h.auth.sign_outs.load(Ordering::SeqCst), 1);
        assert_eq!(h.audit.count_of_type(SecurityEventType::SessionTimeout), 1);
        let snapshot = h.machine.snapshot();
        assert!(snapshot.expired);
        assert!(!snapshot.warning_issued);
    }

    #[tokio::test]
    async fn test_activity_in_warning_returns_to_active() {
        let h = harness();
        h.machine.poll_at(h.t0 + mins(26)).await;
        assert!(h.machine.record_activity_at(h.t0 + mins(27)));
        assert_eq!(h.machine.state_at(h.t0 + mins(28)), SessionState::Active);
        assert!(!h.machine.snapshot().warning_issued);

        // New cycle: warning can fire again.
        let t = h.machine.poll_at(h.t0 + mins(27 + 26)).await;
        assert!(matches!(t, Transition::WarningIssued { .. }));
    }

    #[tokio::test]
    async fn test_activity_ignored_after_expiry() {
        let h = harness();
        h.machine.poll_at(h.t0 + mins(31)).await;
        assert!(!h.machine.record_activity_at(h.t0 + mins(32)));
        assert!(matches!(
            h.machine.extend_session_at(h.t0 + mins(32)).await,
            Err(SecurityError::SessionExpired)
        ));
        assert_eq!(h.machine.state_at(h.t0 + mins(32)), SessionState::Expired);
    }

    #[tokio::test]
    async fn test_extend_session_is_audited() {
        let h = harness();
        h.machine.extend_session_at(h.t0 + mins(20)).await.unwrap();
        assert_eq!(h.machine.snapshot().last_activity, h.t0 + mins(20));
        assert_eq!(h.audit.count_of_type(SecurityEventType::SessionExtended), 1);
    }

    #[test]
    fn test_out_of_order_activity_keeps_latest() {
        let h = harness();
        h.machine.record_activity_at(h.t0 + mins(5));
        h.machine.record_activity_at(h.t0 + mins(3));
        assert_eq!(h.machine.snapshot().last_activity, h.t0 + mins(5));
    }

    #[tokio::test]
    async fn test_reset_starts_fresh_session() {
        let h = harness();
        h.machine.poll_at(h.t0 + mins(31)).await;
        let old_id = h.machine.snapshot().id;
        let fresh = h.machine.reset_at("user-1", h.t0 + mins(40));
        assert_ne!(fresh.id, old_id);
        assert!(!h.machine.is_expired());
        assert_eq!(h.machine.state_at(h.t0 + mins(41)), SessionState::Active);
    }

    #[tokio::test]
    async fn test_terminated_session_never_times_out() {
        let h = harness();
        assert!(h.machine.terminate());
        assert!(!h.machine.terminate());
        assert!(h.machine.is_expired());

        assert_eq!(h.machine.poll_at(h.t0 + mins(26)).await, Transition::None);
        assert_eq!(h.machine.poll_at(h.t0 + mins(45)).await, Transition::None);
        assert!(!h.machine.record_activity_at(h.t0 + mins(46)));

        assert_eq!(h.auth.sign_outs.load(Ordering::SeqCst), 0);
        assert_eq!(h.audit.count_of_type(SecurityEventType::SessionTimeout), 0);
        assert!(h.notifier.notices.lock().unwrap().is_empty());
    }
}
