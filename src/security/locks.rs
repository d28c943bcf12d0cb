// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! The rate limiter, session record, impersonation cache and proxy store all
//! live behind `std::sync::RwLock`. A panic while one of those guards is held
//! must not take the rest of the service down with it, so acquisition
//! recovers the inner guard and logs a security event instead of panicking.
//!
//! ```no_run
//! use std::sync::RwLock;
//! use campusgate::security::locks::{resilient_read, resilient_write};
//!
//! let attempts = RwLock::new(0u32);
//! *resilient_write(&attempts) += 1;
//! assert_eq!(*resilient_read(&attempts), 1);
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read guard, recovering from poisoning.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_READ",
                "CRITICAL: RwLock was poisoned during read acquisition. Recovering data. \
                 Security state may be stale until the next write."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write guard, recovering from poisoning.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_WRITE",
                "CRITICAL: RwLock was poisoned during write acquisition. Recovering data. \
                 Security state may be stale until the next write."
            );
            poisoned.into_inner()
        }
    }
}
