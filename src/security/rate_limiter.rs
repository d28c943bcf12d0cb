// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rate Limiter for credential submission.
//!
//! Tracks failed attempts per identifier (normally the email address) and
//! imposes a temporary lockout once the limit is reached inside the window.
//!
//! ## Rules
//!
//! - A failed attempt increments the counter. If the previous attempt fell
//!   outside the window the counter restarts at 1.
//! - Reaching `max_attempts` sets `blocked_until = now + block_duration`.
//! - A successful attempt deletes the record.
//! - Records older than the window are treated as absent, unless a block is
//!   still running (the block outlives the window).
//!
//! State is in-memory only. Every read-modify-write runs under one write
//! guard so attempts for the same identifier never interleave.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use super::locks::{resilient_read, resilient_write};
use super::session_manager::MAX_DURATION_SECS;
use crate::error::{SecurityError, SecurityResult};

/// Failed attempts allowed inside one window.
pub const MAX_ATTEMPTS: u32 = 5;

/// Window over which failed attempts are counted: 15 minutes.
pub const ATTEMPT_WINDOW_SECS: u64 = 15 * 60;

/// Lockout duration once the limit is hit: 30 minutes.
pub const BLOCK_DURATION_SECS: u64 = 30 * 60;

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            window_secs: ATTEMPT_WINDOW_SECS,
            block_secs: BLOCK_DURATION_SECS,
        }
    }
}

impl RateLimitConfig {
    /// At least one attempt; window and block bounded by [`MAX_DURATION_SECS`].
    pub fn validated(self) -> Self {
        Self {
            max_attempts: self.max_attempts.max(1),
            window_secs: self.window_secs.min(MAX_DURATION_SECS),
            block_secs: self.block_secs.min(MAX_DURATION_SECS),
        }
    }
}

/// Attempt history for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub attempt_count: u32,
    pub last_attempt: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitRecord {
    fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Outside the window and not serving a block.
    fn is_stale_at(&self, now: DateTime<Utc>, window: ChronoDuration) -> bool {
        now - self.last_attempt > window && !self.is_blocked_at(now)
    }
}

/// Per-identifier failed-attempt limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    records: RwLock<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: config.validated(),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.config.window_secs as i64)
    }

    /// Whether the identifier is currently locked out.
    pub fn is_blocked(&self, identifier: &str) -> bool {
        self.is_blocked_at(identifier, Utc::now())
    }

    pub fn is_blocked_at(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        let key = normalize_identifier(identifier);
        let mut records = resilient_write(&self.records);

        let stale = match records.get(&key) {
            Some(record) => record.is_stale_at(now, self.window()),
            None => return false,
        };
        if stale {
            records.remove(&key);
            return false;
        }

        records.get(&key).is_some_and(|r| r.is_blocked_at(now))
    }

    /// Record the outcome of a credential submission.
    pub fn record_attempt(&self, identifier: &str, failed: bool) {
        self.record_attempt_at(identifier, failed, Utc::now());
    }

    pub fn record_attempt_at(&self, identifier: &str, failed: bool, now: DateTime<Utc>) {
        let key = normalize_identifier(identifier);
        let mut records = resilient_write(&self.records);

        if !failed {
            if records.remove(&key).is_some() {
                tracing::debug!(identifier = %mask_identifier(&key), "RATE_LIMIT_CLEARED");
            }
            return;
        }

        let window = self.window();
        let record = records.entry(key.clone()).or_insert(RateLimitRecord {
            attempt_count: 0,
            last_attempt: now,
            blocked_until: None,
        });

        if record.is_stale_at(now, window) {
            record.attempt_count = 0;
            record.blocked_until = None;
        }

        record.attempt_count = record.attempt_count.saturating_add(1);
        record.last_attempt = now;

        if record.attempt_count >= self.config.max_attempts && !record.is_blocked_at(now) {
            let until = now + ChronoDuration::seconds(self.config.block_secs as i64);
            record.blocked_until = Some(until);
            tracing::warn!(
                identifier = %mask_identifier(&key),
                attempts = record.attempt_count,
                blocked_until = %until.to_rfc3339(),
                "RATE_LIMIT_BLOCKED | too many failed attempts"
            );
        } else {
            tracing::debug!(
                identifier = %mask_identifier(&key),
                attempts = record.attempt_count,
                "RATE_LIMIT_FAILED_ATTEMPT"
            );
        }
    }

    /// Time left on the lockout, zero when not blocked.
    pub fn block_time_remaining(&self, identifier: &str) -> Duration {
        self.block_time_remaining_at(identifier, Utc::now())
    }

    pub fn block_time_remaining_at(&self, identifier: &str, now: DateTime<Utc>) -> Duration {
        let key = normalize_identifier(identifier);
        let records = resilient_read(&self.records);
        records
            .get(&key)
            .and_then(|r| r.blocked_until)
            .and_then(|until| (until - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Failed attempts left before lockout inside the current window.
    pub fn remaining_attempts_at(&self, identifier: &str, now: DateTime<Utc>) -> u32 {
        let key = normalize_identifier(identifier);
        let records = resilient_read(&self.records);
        match records.get(&key) {
            Some(r) if r.is_blocked_at(now) => 0,
            Some(r) if !r.is_stale_at(now, self.window()) => {
                self.config.max_attempts.saturating_sub(r.attempt_count)
            }
            _ => self.config.max_attempts,
        }
    }

    /// Gate a credential submission.
    ///
    /// Returns `SecurityError::RateLimited` while the identifier is locked out.
    pub fn guard(&self, identifier: &str) -> SecurityResult<()> {
        self.guard_at(identifier, Utc::now())
    }

    pub fn guard_at(&self, identifier: &str, now: DateTime<Utc>) -> SecurityResult<()> {
        if !self.is_blocked_at(identifier, now) {
            return Ok(());
        }
        let remaining = self.block_time_remaining_at(identifier, now);
        Err(SecurityError::RateLimited {
            identifier: mask_identifier(&normalize_identifier(identifier)),
            retry_after_secs: remaining.as_secs().max(1),
        })
    }

    /// Drop every stale record. Returns how many were removed.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let window = self.window();
        let mut records = resilient_write(&self.records);
        let before = records.len();
        records.retain(|_, r| !r.is_stale_at(now, window));
        before - records.len()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_count(&self) -> usize {
        resilient_read(&self.records).len()
    }
}

fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Mask an identifier for logs: `jane.doe@school.edu` → `ja***@school.edu`.
pub fn mask_identifier(identifier: &str) -> String {
    let (local, domain) = match identifier.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (identifier, None),
    };
    let visible: String = local.chars().take(2).collect();
    match domain {
        Some(domain) => format!("{}***@{}", visible, domain),
        None => format!("{}***", visible),
    }
}

// ============================================================================
// TESTS
// ============================================================================
