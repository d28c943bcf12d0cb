// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end session flows against an in-memory backend.
//!
//! Sign-in throttling, inactivity timeout, sign-out and impersonation are
//! driven through the public API the way a client would drive them.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use campusgate::audit::{SecurityAuditLog, SecurityEventType};
use campusgate::backend::{
    AuthService, AuthUser, BackendRpc, Collaborators, NoticeLevel, Notifier, ProfileStore,
    RPC_END_IMPERSONATION, RPC_GET_IMPERSONATION_CONTEXT, RPC_LOG_SECURITY_EVENT,
    RPC_START_IMPERSONATION,
};
use campusgate::error::{SecurityError, SecurityResult};
use campusgate::router::{
    can_access_route, resolve_route, Role, ADMIN_DASHBOARD, AUTH_ROUTE, EDUCATOR_DASHBOARD,
    STUDENT_DASHBOARD,
};
use campusgate::security::sign_out::StoredTokens;
use campusgate::security::{
    LocalAuthState, RateLimitConfig, SecurityServices, SessionConfig, SessionState,
    SessionTimeoutStateMachine, SignOutReason, SignOutService, Transition,
};

// =============================================================================
// MOCK BACKEND
// =============================================================================

/// Backend that keeps one impersonation record, like the hosted service does.
#[derive(Default)]
struct MockBackend {
    role: Option<String>,
    sign_outs: AtomicUsize,
    impersonation: Mutex<Option<Value>>,
    rpc_calls: Mutex<Vec<String>>,
}

impl MockBackend {
    fn with_role(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            ..Default::default()
        }
    }

    fn calls_to(&self, name: &str) -> usize {
        self.rpc_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }
}

#[async_trait]
impl AuthService for MockBackend {
    async fn sign_out(&self) -> SecurityResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_user(&self) -> SecurityResult<Option<AuthUser>> {
        Ok(None)
    }
}

#[async_trait]
impl BackendRpc for MockBackend {
    async fn rpc(&self, name: &str, params: Value) -> SecurityResult<Value> {
        self.rpc_calls.lock().unwrap().push(name.to_string());
        match name {
            RPC_LOG_SECURITY_EVENT => Ok(Value::Null),
            RPC_START_IMPERSONATION => {
                let record = json!({
                    "session_id": "imp-1",
                    "target_user_id": params["target_user_id"],
                    "target_role": params["target_role"],
                    "target_display_name": "Ada Student",
                });
                *self.impersonation.lock().unwrap() = Some(record);
                Ok(json!("imp-1"))
            }
            RPC_GET_IMPERSONATION_CONTEXT => {
                // The hosted RPC answers with a set of rows.
                Ok(match self.impersonation.lock().unwrap().clone() {
                    Some(record) => json!([record]),
                    None => json!([]),
                })
            }
            RPC_END_IMPERSONATION => {
                self.impersonation.lock().unwrap().take();
                Ok(Value::Null)
            }
            other => Err(SecurityError::Rpc {
                name: other.to_string(),
                message: "unknown function".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ProfileStore for MockBackend {
    async fn fetch_role(&self, _user_id: &str) -> SecurityResult<Option<String>> {
        Ok(self.role.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, title: &str, _body: &str) {
        self.notices.lock().unwrap().push((level, title.to_string()));
    }
}

fn collaborators(backend: &Arc<MockBackend>) -> Collaborators {
    Collaborators {
        auth: backend.clone(),
        rpc: backend.clone(),
        profiles: backend.clone(),
    }
}

fn services(backend: &Arc<MockBackend>) -> SecurityServices {
    SecurityServices::new(
        collaborators(backend),
        Arc::new(LocalAuthState::new()),
        SessionConfig::default(),
        RateLimitConfig::default(),
        None,
    )
}

fn tokens(user_id: &str) -> StoredTokens {
    StoredTokens {
        access_token: "access".to_string(),
        refresh_token: Some("refresh".to_string()),
        user_id: user_id.to_string(),
        expires_at: None,
    }
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

// =============================================================================
// SIGN-IN THROTTLING
// =============================================================================

#[tokio::test]
async fn test_five_rejected_sign_ins_lock_the_identifier() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);

    for _ in 0..5 {
        let result: SecurityResult<()> = services
            .attempt_sign_in("ada@campus.edu", || async {
                Err(SecurityError::Auth("invalid login credentials".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SecurityError::Auth(_))));
    }

    let flag = AtomicBool::new(false);
    let called = &flag;
    let result: SecurityResult<()> = services
        .attempt_sign_in("ADA@campus.edu ", || async move {
            called.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

    match result {
        Err(SecurityError::RateLimited { retry_after_secs, .. }) => {
            assert!(retry_after_secs > 25 * 60);
        }
        other => panic!("expected lockout, got {:?}", other),
    }
    assert!(!flag.load(Ordering::SeqCst), "blocked attempt must not reach the backend");

    let audit = services.audit();
    assert_eq!(audit.count_of_type(SecurityEventType::AccountLocked), 1);
    assert_eq!(audit.count_of_type(SecurityEventType::LoginFailed), 5);
}

#[tokio::test]
async fn test_successful_sign_in_clears_failures() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);

    for _ in 0..4 {
        let _: SecurityResult<()> = services
            .attempt_sign_in("ada@campus.edu", || async {
                Err(SecurityError::Auth("bad".to_string()))
            })
            .await;
    }
    let ok: SecurityResult<&str> = services
        .attempt_sign_in("ada@campus.edu", || async { Ok("user-1") })
        .await;
    assert_eq!(ok.unwrap(), "user-1");
    assert_eq!(services.rate_limiter().tracked_count(), 0);

    // Four more failures are allowed again without a lockout.
    for _ in 0..4 {
        let result: SecurityResult<()> = services
            .attempt_sign_in("ada@campus.edu", || async {
                Err(SecurityError::Auth("bad".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SecurityError::Auth(_))));
    }
    assert!(!services.rate_limiter().is_blocked("ada@campus.edu"));
}

#[tokio::test]
async fn test_backend_outage_does_not_count_as_failure() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);

    for _ in 0..10 {
        let _: SecurityResult<()> = services
            .attempt_sign_in("ada@campus.edu", || async {
                Err(SecurityError::NotConfigured("offline".to_string()))
            })
            .await;
    }
    assert!(!services.rate_limiter().is_blocked("ada@campus.edu"));
}

// =============================================================================
// ROUTING
// =============================================================================

#[tokio::test]
async fn test_login_landing_routes() {
    let backend = Arc::new(MockBackend::with_role("student,admin"));
    let services = services(&backend);

    let role = services.current_role("user-1").await.unwrap();
    assert_eq!(services.landing_route(Some(&role)), ADMIN_DASHBOARD);
    assert_eq!(resolve_route(None, false), STUDENT_DASHBOARD);

    assert!(can_access_route(Some("admin"), EDUCATOR_DASHBOARD));
    assert!(!can_access_route(Some("student"), ADMIN_DASHBOARD));
}

#[tokio::test]
async fn test_missing_profile_defaults_to_student() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);
    assert_eq!(services.current_role("user-1").await.unwrap(), "student");
}

#[tokio::test]
async fn test_denied_navigation_is_audited() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);

    let redirect = services
        .resolve_navigation(Some("student"), ADMIN_DASHBOARD)
        .await;
    assert_eq!(redirect, Some(STUDENT_DASHBOARD));
    assert_eq!(services.audit().count_of_type(SecurityEventType::RouteDenied), 1);

    let redirect = services.resolve_navigation(None, ADMIN_DASHBOARD).await;
    assert_eq!(redirect, Some(AUTH_ROUTE));
    assert_eq!(services.audit().count_of_type(SecurityEventType::RouteDenied), 1);
}

// =============================================================================
// INACTIVITY TIMEOUT
// =============================================================================

struct Harness {
    backend: Arc<MockBackend>,
    local: Arc<LocalAuthState>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<SecurityAuditLog>,
    machine: SessionTimeoutStateMachine,
}

fn harness() -> Harness {
    let backend = Arc::new(MockBackend::default());
    let local = Arc::new(LocalAuthState::new());
    local.store(tokens("user-1"));
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(SecurityAuditLog::new(backend.clone()));
    let machine = SessionTimeoutStateMachine::new_at(
        SessionConfig::default(),
        "user-1",
        audit.clone(),
        SignOutService::new(backend.clone(), local.clone()),
        notifier.clone(),
        t0(),
    );
    Harness {
        backend,
        local,
        notifier,
        audit,
        machine,
    }
}

#[tokio::test]
async fn test_idle_session_warns_then_expires_once() {
    let h = harness();

    let at_26 = t0() + ChronoDuration::minutes(26);
    assert_eq!(h.machine.state_at(at_26), SessionState::Warning);
    match h.machine.poll_at(at_26).await {
        Transition::WarningIssued { expires_in_secs, .. } => assert_eq!(expires_in_secs, 240),
        other => panic!("expected warning, got {:?}", other),
    }
    // The warning is not repeated on the next poll.
    assert_eq!(
        h.machine.poll_at(at_26 + ChronoDuration::minutes(1)).await,
        Transition::None
    );

    let at_31 = t0() + ChronoDuration::minutes(31);
    assert!(matches!(
        h.machine.poll_at(at_31).await,
        Transition::Expired { .. }
    ));
    assert_eq!(
        h.machine.poll_at(at_31 + ChronoDuration::minutes(5)).await,
        Transition::None
    );

    assert_eq!(h.backend.sign_outs.load(Ordering::SeqCst), 1);
    assert!(!h.local.is_signed_in());
    assert_eq!(h.audit.count_of_type(SecurityEventType::SessionTimeout), 1);
    assert_eq!(h.audit.count_of_type(SecurityEventType::SessionWarning), 1);

    let notices = h.notifier.notices.lock().unwrap();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].0, NoticeLevel::Warning);
    assert_eq!(notices[1].0, NoticeLevel::Error);
}

#[tokio::test]
async fn test_interaction_during_warning_returns_to_active() {
    let h = harness();

    let at_27 = t0() + ChronoDuration::minutes(27);
    assert!(matches!(
        h.machine.poll_at(at_27).await,
        Transition::WarningIssued { .. }
    ));
    assert!(h.machine.record_activity_at(at_27));
    assert_eq!(h.machine.state_at(at_27), SessionState::Active);

    // The fresh activity restarts the clock.
    let later = at_27 + ChronoDuration::minutes(20);
    assert_eq!(h.machine.poll_at(later).await, Transition::None);
    assert_eq!(h.backend.sign_outs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_extend_after_expiry_is_rejected() {
    let h = harness();

    h.machine
        .extend_session_at(t0() + ChronoDuration::minutes(28))
        .await
        .unwrap();
    assert_eq!(h.audit.count_of_type(SecurityEventType::SessionExtended), 1);

    let expired_at = t0() + ChronoDuration::minutes(60);
    h.machine.poll_at(expired_at).await;
    assert!(h.machine.is_expired());
    assert!(matches!(
        h.machine.extend_session_at(expired_at).await,
        Err(SecurityError::SessionExpired)
    ));
    assert!(!h.machine.record_activity_at(expired_at));
}

// =============================================================================
// SIGN-OUT
// =============================================================================

#[tokio::test]
async fn test_user_sign_out_ends_session() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);
    services.local_state().store(tokens("user-1"));
    services.begin_session("user-1");

    let outcome = services.sign_out().await;
    assert_eq!(outcome.reason, SignOutReason::UserRequested);
    assert_eq!(outcome.redirect_to, AUTH_ROUTE);
    assert!(outcome.remote_confirmed);

    assert!(services.session().is_none());
    assert!(!services.local_state().is_signed_in());
    assert_eq!(services.audit().count_of_type(SecurityEventType::SignOut), 1);
    assert_eq!(backend.sign_outs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sign_out_stops_the_previous_session_poller() {
    let backend = Arc::new(MockBackend::default());
    let config = SessionConfig {
        poll_interval_secs: 1,
        ..SessionConfig::custom(2, 1)
    };
    let services = SecurityServices::new(
        collaborators(&backend),
        Arc::new(LocalAuthState::new()),
        config,
        RateLimitConfig::default(),
        None,
    );

    services.local_state().store(tokens("u1"));
    let first = services.begin_session("u1");
    let (_tx, rx) = mpsc::channel(4);
    let monitor = services.start_monitor(rx).unwrap();

    services.sign_out().await;
    assert!(first.is_expired());

    services.begin_session("u2");
    services.local_state().store(tokens("u2"));

    // Well past the first session's timeout.
    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert!(services.local_state().is_signed_in());
    assert_eq!(services.local_state().user_id().as_deref(), Some("u2"));
    assert_eq!(backend.sign_outs.load(Ordering::SeqCst), 1);
    assert_eq!(services.audit().count_of_type(SecurityEventType::SessionTimeout), 0);
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn test_new_session_terminates_the_one_it_replaces() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);

    let first = services.begin_session("u1");
    let second = services.begin_session("u2");

    assert!(first.is_expired());
    assert!(!second.is_expired());
    assert_eq!(first.poll_at(Utc::now() + ChronoDuration::hours(1)).await, Transition::None);
    assert_eq!(backend.sign_outs.load(Ordering::SeqCst), 0);
}

// =============================================================================
// IMPERSONATION
// =============================================================================

#[tokio::test]
async fn test_sign_out_drops_cached_impersonation() {
    let backend = Arc::new(MockBackend::with_role("admin"));
    let services = services(&backend);
    services.begin_session("admin-1");
    services
        .impersonation()
        .start_impersonation("student-7", Role::Student)
        .await
        .unwrap();
    assert_eq!(services.effective_role(Some("admin")).as_deref(), Some("student"));

    services.sign_out().await;
    assert!(!services.impersonation().is_impersonating());

    services.begin_session("admin-2");
    assert_eq!(services.effective_role(Some("admin")).as_deref(), Some("admin"));
    assert_eq!(services.landing_route(Some("admin")), ADMIN_DASHBOARD);
}

#[tokio::test]
async fn test_timeout_drops_cached_impersonation() {
    let backend = Arc::new(MockBackend::with_role("admin"));
    let services = services(&backend);
    let session = services.begin_session("admin-1");
    services
        .impersonation()
        .start_impersonation("educator-3", Role::Educator)
        .await
        .unwrap();

    let t = session.poll_at(Utc::now() + ChronoDuration::minutes(31)).await;
    assert!(matches!(t, Transition::Expired { .. }));

    assert!(!services.impersonation().is_impersonating());
    assert_eq!(services.effective_role(Some("admin")).as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_impersonation_round_trip_restores_own_routing() {
    let backend = Arc::new(MockBackend::with_role("admin"));
    let services = services(&backend);
    let own_role = services.current_role("admin-1").await.unwrap();
    assert_eq!(services.landing_route(Some(&own_role)), ADMIN_DASHBOARD);

    let ctx = services
        .impersonation()
        .start_impersonation("student-7", Role::Student)
        .await
        .unwrap();
    assert_eq!(ctx.session_id, "imp-1");
    assert_eq!(ctx.target_role, "student");
    assert_eq!(ctx.target_display_name.as_deref(), Some("Ada Student"));

    // While impersonating, navigation follows the target's role.
    assert_eq!(services.landing_route(Some(&own_role)), STUDENT_DASHBOARD);
    assert_eq!(
        services
            .resolve_navigation(Some(&own_role), ADMIN_DASHBOARD)
            .await,
        Some(STUDENT_DASHBOARD)
    );

    assert!(services.impersonation().end_impersonation().await.unwrap());
    assert_eq!(services.landing_route(Some(&own_role)), ADMIN_DASHBOARD);
    assert_eq!(
        services
            .resolve_navigation(Some(&own_role), ADMIN_DASHBOARD)
            .await,
        None
    );

    let status = services
        .impersonation()
        .check_impersonation_status()
        .await
        .unwrap();
    assert!(status.is_none());

    let audit = services.audit();
    assert_eq!(audit.count_of_type(SecurityEventType::ImpersonationStarted), 1);
    assert_eq!(audit.count_of_type(SecurityEventType::ImpersonationEnded), 1);
    assert_eq!(backend.calls_to(RPC_START_IMPERSONATION), 1);
    assert_eq!(backend.calls_to(RPC_END_IMPERSONATION), 1);
}

#[tokio::test]
async fn test_resume_drops_impersonation_ended_elsewhere() {
    let backend = Arc::new(MockBackend::with_role("admin"));
    let services = services(&backend);

    services
        .impersonation()
        .start_impersonation("educator-3", Role::Educator)
        .await
        .unwrap();
    assert_eq!(services.effective_role(Some("admin")).as_deref(), Some("educator"));

    // Ended from another tab.
    backend.impersonation.lock().unwrap().take();

    assert!(services.on_resume().await.is_none());
    assert!(!services.impersonation().is_impersonating());
    assert_eq!(services.effective_role(Some("admin")).as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_ending_without_impersonation_is_a_no_op() {
    let backend = Arc::new(MockBackend::default());
    let services = services(&backend);
    assert!(!services.impersonation().end_impersonation().await.unwrap());
    assert_eq!(backend.calls_to(RPC_END_IMPERSONATION), 0);
}
