// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Admin impersonation.
//!
//! The impersonation record lives on the server. This controller keeps a
//! read-through cache of it and exposes the role that navigation should use
//! while the record is active.
//!
//! Start and end calls never overlap: a second call while one is in flight
//! fails with [`SecurityError::OperationInFlight`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::locks::{resilient_read, resilient_write};
use crate::audit::{SecurityAuditLog, SecurityEventType};
use crate::backend::{
    BackendRpc, NoticeLevel, Notifier, RPC_END_IMPERSONATION, RPC_GET_IMPERSONATION_CONTEXT,
    RPC_START_IMPERSONATION,
};
use crate::error::{SecurityError, SecurityResult};
use crate::router::Role;

/// Server-held impersonation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationContext {
    pub session_id: String,
    pub target_user_id: String,
    pub target_role: String,
    #[serde(default)]
    pub target_display_name: Option<String>,
    #[serde(default)]
    pub target_email: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Starts, ends and tracks impersonation for the signed-in admin.
pub struct ImpersonationController {
    rpc: Arc<dyn BackendRpc>,
    audit: Arc<SecurityAuditLog>,
    notifier: Arc<dyn Notifier>,
    context: RwLock<Option<ImpersonationContext>>,
    in_flight: AtomicBool,
}

impl ImpersonationController {
    pub fn new(
        rpc: Arc<dyn BackendRpc>,
        audit: Arc<SecurityAuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rpc,
            audit,
            notifier,
            context: RwLock::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    fn begin(&self) -> SecurityResult<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SecurityError::OperationInFlight)?;
        Ok(InFlightGuard(&self.in_flight))
    }

    /// Cached context, if any.
    pub fn active_context(&self) -> Option<ImpersonationContext> {
        resilient_read(&self.context).clone()
    }

    pub fn is_impersonating(&self) -> bool {
        resilient_read(&self.context).is_some()
    }

    /// Drop the cached context without calling the backend.
    ///
    /// The cache belongs to the signed-in user; sign-out clears it so the
    /// next account starts from its own role. Returns whether a context was
    /// cached.
    pub fn clear_local(&self) -> bool {
        let dropped = resilient_write(&self.context).take();
        if let Some(ctx) = &dropped {
            tracing::info!(session = %ctx.session_id, "IMPERSONATION_CACHE_CLEARED");
        }
        dropped.is_some()
    }

    /// Role used for navigation: the target's while impersonating.
    pub fn effective_role(&self, own_role: Option<&str>) -> Option<String> {
        match resilient_read(&self.context).as_ref() {
            Some(ctx) => Some(ctx.target_role.clone()),
            None => own_role.map(str::to_string),
        }
    }

    /// Begin acting as `target_user_id` with `target_role`.
    ///
    /// On failure the user is notified and any prior context is kept.
    pub async fn start_impersonation(
        &self,
        target_user_id: &str,
        target_role: Role,
    ) -> SecurityResult<ImpersonationContext> {
        let _guard = self.begin()?;

        let result = async {
            self.rpc
                .rpc(
                    RPC_START_IMPERSONATION,
                    json!({
                        "target_user_id": target_user_id,
                        "target_role": target_role.as_str(),
                    }),
                )
                .await?;
            self.fetch_context()
                .await?
                .ok_or_else(|| SecurityError::Rpc {
                    name: RPC_GET_IMPERSONATION_CONTEXT.to_string(),
                    message: "no impersonation context after start".to_string(),
                })
        }
        .await;

        match result {
            Ok(ctx) => {
                *resilient_write(&self.context) = Some(ctx.clone());
                tracing::info!(
                    session = %ctx.session_id,
                    target = %ctx.target_user_id,
                    role = %ctx.target_role,
                    "IMPERSONATION_STARTED"
                );
                self.audit
                    .log(
                        SecurityEventType::ImpersonationStarted,
                        json!({
                            "session_id": ctx.session_id,
                            "target_user_id": ctx.target_user_id,
                            "target_role": ctx.target_role,
                        }),
                        None,
                    )
                    .await;
                Ok(ctx)
            }
            Err(e) => {
                tracing::warn!(target = %target_user_id, error = %e, "IMPERSONATION_START_FAILED");
                self.notifier
                    .notify(NoticeLevel::Error, "Impersonation failed", &e.user_message());
                self.audit
                    .log(
                        SecurityEventType::ImpersonationFailed,
                        json!({
                            "target_user_id": target_user_id,
                            "target_role": target_role.as_str(),
                            "error": e.to_string(),
                        }),
                        None,
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// End the active impersonation. Returns `false` when there was none.
    pub async fn end_impersonation(&self) -> SecurityResult<bool> {
        let _guard = self.begin()?;

        let Some(ctx) = self.active_context() else {
            tracing::debug!("end_impersonation with no active context");
            return Ok(false);
        };

        match self
            .rpc
            .rpc(RPC_END_IMPERSONATION, json!({ "session_id": ctx.session_id }))
            .await
        {
            Ok(_) => {
                *resilient_write(&self.context) = None;
                tracing::info!(session = %ctx.session_id, "IMPERSONATION_ENDED");
                self.audit
                    .log(
                        SecurityEventType::ImpersonationEnded,
                        json!({
                            "session_id": ctx.session_id,
                            "target_user_id": ctx.target_user_id,
                        }),
                        None,
                    )
                    .await;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(session = %ctx.session_id, error = %e, "IMPERSONATION_END_FAILED");
                self.notifier.notify(
                    NoticeLevel::Error,
                    "Could not end impersonation",
                    &e.user_message(),
                );
                Err(e)
            }
        }
    }

    /// Refresh the cache from the server. Absence clears it.
    ///
    /// A failed lookup leaves the cache as it was.
    pub async fn check_impersonation_status(&self) -> SecurityResult<Option<ImpersonationContext>> {
        match self.fetch_context().await {
            Ok(ctx) => {
                let mut cached = resilient_write(&self.context);
                if cached.is_some() && ctx.is_none() {
                    tracing::info!("impersonation no longer active on server; cache cleared");
                }
                *cached = ctx.clone();
                Ok(ctx)
            }
            Err(e) => {
                tracing::warn!(error = %e, "impersonation status check failed");
                Err(e)
            }
        }
    }

    async fn fetch_context(&self) -> SecurityResult<Option<ImpersonationContext>> {
        let value = self
            .rpc
            .rpc(RPC_GET_IMPERSONATION_CONTEXT, Value::Null)
            .await?;
        parse_context(value)
    }
}

/// Accepts `null`, a single record, or a (possibly empty) array of records.
fn parse_context(value: Value) -> SecurityResult<Option<ImpersonationContext>> {
    let record = match value {
        Value::Null => return Ok(None),
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(None),
        },
        other => other,
    };
    if record.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(record)?))
}
