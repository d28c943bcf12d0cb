// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security Audit Log client
//!
//! Security-relevant events are appended to the durable log held by the
//! backend through the `log_security_event` RPC. A bounded tail of recent
//! events is kept in memory for audit views and tests.
//!
//! Log format (tracing line):
//! `2025-03-01 09:30:00 UTC | SESSION_TIMEOUT | actor=u-123 | {"last_activity":"..."}`
//!
//! Details are passed through [`redact_secrets`] before they are logged or
//! shipped anywhere.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock};

use crate::backend::{BackendRpc, RPC_LOG_SECURITY_EVENT};
use crate::error::SecurityResult;
use crate::security::locks::{resilient_read, resilient_write};

/// Events kept in the in-memory tail.
const DEFAULT_RECENT_CAPACITY: usize = 256;

/// Redaction patterns for secrets that may end up in event details.
static REDACTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"sk-or-[a-zA-Z0-9-]{20,}").expect("OpenRouter key regex is valid"), "[REDACTED_API_KEY]"),
        (Regex::new(r"sk-[a-zA-Z0-9]{20,}").expect("API key regex is valid"), "[REDACTED_API_KEY]"),
        (Regex::new(r"re_[a-zA-Z0-9_]{16,}").expect("Resend key regex is valid"), "[REDACTED_API_KEY]"),
        (Regex::new(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+").expect("JWT regex is valid"), "[REDACTED_JWT]"),
        (Regex::new(r"(?i)password[=:]\s*\S+").expect("Password regex is valid"), "password=[REDACTED]"),
        (Regex::new(r"Bearer [a-zA-Z0-9-._~+/]+=*").expect("Bearer token regex is valid"), "Bearer [REDACTED]"),
        (Regex::new(r"\b[A-Za-z0-9]{40,}\b").expect("Generic key regex is valid"), "[REDACTED_KEY]"),
    ]
});

/// Redact secrets from text before logging.
pub fn redact_secrets(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in REDACTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Redact every string inside a JSON value.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_secrets(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if k.to_ascii_lowercase().contains("password") {
                        (k, Value::String("[REDACTED]".to_string()))
                    } else {
                        (k, redact_value(v))
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Kinds of security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    SessionTimeout,
    SessionWarning,
    SessionExtended,
    SignOut,
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    ImpersonationStarted,
    ImpersonationEnded,
    ImpersonationFailed,
    RouteDenied,
}

impl SecurityEventType {
    /// Name sent to the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionTimeout => "session_timeout",
            Self::SessionWarning => "session_warning",
            Self::SessionExtended => "session_extended",
            Self::SignOut => "sign_out",
            Self::LoginSucceeded => "login_succeeded",
            Self::LoginFailed => "login_failed",
            Self::AccountLocked => "account_locked",
            Self::ImpersonationStarted => "impersonation_started",
            Self::ImpersonationEnded => "impersonation_ended",
            Self::ImpersonationFailed => "impersonation_failed",
            Self::RouteDenied => "route_denied",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_ascii_uppercase())
    }
}

/// One append-only security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: Value) -> Self {
        Self {
            event_type,
            details: redact_value(details),
            actor_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Format event for the audit log
    pub fn to_audit_string(&self) -> String {
        format!(
            "{} | {} | actor={} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.event_type,
            self.actor_id.as_deref().unwrap_or("-"),
            self.details
        )
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Appends security events to the backend log.
pub struct SecurityAuditLog {
    rpc: Arc<dyn BackendRpc>,
    recent: RwLock<VecDeque<SecurityEvent>>,
    capacity: usize,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl SecurityAuditLog {
    pub fn new(rpc: Arc<dyn BackendRpc>) -> Self {
        Self {
            rpc,
            recent: RwLock::new(VecDeque::new()),
            capacity: DEFAULT_RECENT_CAPACITY,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Bound the in-memory tail. A capacity of zero keeps nothing.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Attach client network details to every event sent upstream.
    pub fn with_client_info(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    /// Record an event locally and append it to the backend log.
    pub async fn record(&self, event: SecurityEvent) -> SecurityResult<()> {
        tracing::info!(target: "security::audit", "{}", event.to_audit_string());

        let params = json!({
            "event_type": event.event_type.as_str(),
            "details": event.details,
            "ip_address": self.ip_address,
            "user_agent": self.user_agent,
        });

        self.remember(event);
        self.rpc.rpc(RPC_LOG_SECURITY_EVENT, params).await.map(|_| ())
    }

    /// Fire-and-forget variant of [`record`](Self::record).
    ///
    /// Audit failures never change session state; they are logged and dropped.
    pub async fn log(&self, event_type: SecurityEventType, details: Value, actor_id: Option<&str>) {
        let mut event = SecurityEvent::new(event_type, details);
        if let Some(actor) = actor_id {
            event = event.with_actor(actor);
        }
        if let Err(e) = self.record(event).await {
            tracing::warn!(
                event_type = %event_type,
                error = %e,
                "AUDIT_DELIVERY_FAILED | security event kept locally only"
            );
        }
    }

    fn remember(&self, event: SecurityEvent) {
        if self.capacity == 0 {
            return;
        }
        let mut recent = resilient_write(&self.recent);
        while recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    /// Recent events, oldest first.
    pub fn recent_events(&self) -> Vec<SecurityEvent> {
        resilient_read(&self.recent).iter().cloned().collect()
    }

    pub fn events_of_type(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        resilient_read(&self.recent)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn count_of_type(&self, event_type: SecurityEventType) -> usize {
        resilient_read(&self.recent)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SecurityError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRpc {
        calls: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl BackendRpc for RecordingRpc {
        async fn rpc(&self, name: &str, params: Value) -> SecurityResult<Value> {
            self.calls.lock().unwrap().push((name.to_string(), params));
            if self.fail {
                return Err(SecurityError::Rpc {
                    name: name.to_string(),
                    message: "unavailable".to_string(),
                });
            }
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_redact_secrets() {
        let text = "key sk-or-v1-abcdefghijklmnopqrstuvwxyz and password: hunter2";
        let redacted = redact_secrets(text);
        assert!(!redacted.contains("abcdefghijklmnop"));
        assert!(!redacted.contains("hunter2"));
    }

    #[test]
    fn test_redact_value_nested() {
        let value = json!({
            "password": "hunter2",
            "nested": { "token": "Bearer abc.def.ghi" },
            "list": ["plain"]
        });
        let redacted = redact_value(value);
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["nested"]["token"], "Bearer [REDACTED]");
        assert_eq!(redacted["list"][0], "plain");
    }

    #[test]
    fn test_audit_string() {
        let event = SecurityEvent::new(SecurityEventType::SessionTimeout, json!({"k": 1}))
            .with_actor("u-123");
        let line = event.to_audit_string();
        assert!(line.contains("SESSION_TIMEOUT"));
        assert!(line.contains("actor=u-123"));
    }

    #[tokio::test]
    async fn test_record_sends_rpc() {
        let rpc = Arc::new(RecordingRpc::default());
        let log = SecurityAuditLog::new(rpc.clone())
            .with_client_info(Some("10.0.0.1".to_string()), None);

        log.log(SecurityEventType::LoginFailed, json!({"email": "a@b.c"}), None)
            .await;

        let calls = rpc.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, RPC_LOG_SECURITY_EVENT);
        assert_eq!(calls[0].1["event_type"], "login_failed");
        assert_eq!(calls[0].1["ip_address"], "10.0.0.1");
        assert!(calls[0].1["user_agent"].is_null());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_local_copy() {
        let rpc = Arc::new(RecordingRpc {
            fail: true,
            ..Default::default()
        });
        let log = SecurityAuditLog::new(rpc);
        log.log(SecurityEventType::SignOut, Value::Null, Some("u1")).await;
        assert_eq!(log.count_of_type(SecurityEventType::SignOut), 1);
    }

    #[tokio::test]
    async fn test_recent_tail_is_bounded() {
        let log = SecurityAuditLog::new(Arc::new(RecordingRpc::default())).with_capacity(2);
        for _ in 0..3 {
            log.log(SecurityEventType::SessionExtended, Value::Null, None).await;
        }
        log.log(SecurityEventType::SignOut, Value::Null, None).await;
        let recent = log.recent_events();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].event_type, SecurityEventType::SignOut);
        assert_eq!(log.events_of_type(SecurityEventType::SessionExtended).len(), 1);
    }
}
