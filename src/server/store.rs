// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory store for one-time email codes and passkey challenges.
//!
//! Codes are kept as SHA-256 digests and compared in constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use subtle::ConstantTimeEq;

use crate::security::locks::{resilient_read, resilient_write};

/// Verification codes expire after 10 minutes.
pub const CODE_TTL_SECS: i64 = 10 * 60;

/// Passkey challenges expire after 5 minutes.
pub const CHALLENGE_TTL_SECS: i64 = 5 * 60;

/// Random bytes in a passkey challenge.
const CHALLENGE_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct VerificationCode {
    code_hash: [u8; 32],
    expires_at: DateTime<Utc>,
    used: bool,
}

/// Outcome of checking an email code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    NotFound,
    Expired,
    AlreadyUsed,
    Mismatch,
}

impl VerifyOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Valid)
    }

    pub fn message(&self) -> &'static str {
        match self {
            VerifyOutcome::Valid => "Email verified successfully.",
            VerifyOutcome::NotFound => "No verification code found for this email.",
            VerifyOutcome::Expired => "Verification code has expired.",
            VerifyOutcome::AlreadyUsed => "Verification code has already been used.",
            VerifyOutcome::Mismatch => "Invalid verification code.",
        }
    }
}

/// Registration or authentication ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Registration,
    Authentication,
}

/// A stored passkey challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasskeyChallenge {
    pub challenge: String,
    pub kind: ChallengeKind,
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ProxyStore {
    codes: RwLock<HashMap<String, VerificationCode>>,
    challenges: RwLock<HashMap<String, PasskeyChallenge>>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_code(code: &str) -> [u8; 32] {
    Sha256::digest(code.trim().as_bytes()).into()
}

impl ProxyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh 6-digit code for `email`, replacing any previous one.
    pub fn issue_code_at(&self, email: &str, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let expires_at = now + ChronoDuration::seconds(CODE_TTL_SECS);
        resilient_write(&self.codes).insert(
            normalize_email(email),
            VerificationCode {
                code_hash: hash_code(&code),
                expires_at,
                used: false,
            },
        );
        tracing::debug!(digest = %hex::encode(&hash_code(&code)[..4]), "verification code issued");
        (code, expires_at)
    }

    /// Check and consume a code. A valid code is marked used.
    pub fn verify_code_at(&self, email: &str, code: &str, now: DateTime<Utc>) -> VerifyOutcome {
        let mut codes = resilient_write(&self.codes);
        let Some(entry) = codes.get_mut(&normalize_email(email)) else {
            return VerifyOutcome::NotFound;
        };
        if entry.used {
            return VerifyOutcome::AlreadyUsed;
        }
        if now >= entry.expires_at {
            return VerifyOutcome::Expired;
        }
        let matches: bool = entry.code_hash.ct_eq(&hash_code(code)).into();
        if !matches {
            return VerifyOutcome::Mismatch;
        }
        entry.used = true;
        VerifyOutcome::Valid
    }

    /// Discard the pending code for `email`. Returns whether one existed.
    pub fn revoke_code(&self, email: &str) -> bool {
        resilient_write(&self.codes)
            .remove(&normalize_email(email))
            .is_some()
    }

    /// Create and remember a passkey challenge.
    pub fn issue_challenge_at(
        &self,
        kind: ChallengeKind,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> PasskeyChallenge {
        let mut bytes = [0u8; CHALLENGE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);

        let challenge = PasskeyChallenge {
            challenge: URL_SAFE_NO_PAD.encode(bytes),
            kind,
            user_id: user_id.map(str::to_string),
            expires_at: now + ChronoDuration::seconds(CHALLENGE_TTL_SECS),
        };
        resilient_write(&self.challenges).insert(challenge.challenge.clone(), challenge.clone());
        challenge
    }

    /// Take a challenge if it exists, matches `kind` and has not expired.
    pub fn consume_challenge_at(
        &self,
        challenge: &str,
        kind: ChallengeKind,
        now: DateTime<Utc>,
    ) -> Option<PasskeyChallenge> {
        let stored = resilient_write(&self.challenges).remove(challenge)?;
        (stored.kind == kind && now < stored.expires_at).then_some(stored)
    }

    /// Drop expired and used entries. Returns how many were removed.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        {
            let mut codes = resilient_write(&self.codes);
            let before = codes.len();
            codes.retain(|_, c| !c.used && now < c.expires_at);
            removed += before - codes.len();
        }
        {
            let mut challenges = resilient_write(&self.challenges);
            let before = challenges.len();
            challenges.retain(|_, c| now < c.expires_at);
            removed += before - challenges.len();
        }
        removed
    }

    pub fn pending_challenges(&self) -> usize {
        resilient_read(&self.challenges).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_code_is_single_use() {
        let store = ProxyStore::new();
        let (code, _) = store.issue_code_at("Student@School.edu", t0());
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        assert_eq!(store.verify_code_at("student@school.edu", &code, t0()), VerifyOutcome::Valid);
        assert_eq!(
            store.verify_code_at("student@school.edu", &code, t0()),
            VerifyOutcome::AlreadyUsed
        );
    }

    #[test]
    fn test_code_expiry_and_mismatch() {
        let store = ProxyStore::new();
        let (code, expires_at) = store.issue_code_at("a@b.c", t0());
        assert_eq!(expires_at, t0() + ChronoDuration::minutes(10));

        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert_eq!(store.verify_code_at("a@b.c", wrong, t0()), VerifyOutcome::Mismatch);
        assert_eq!(store.verify_code_at("a@b.c", &code, expires_at), VerifyOutcome::Expired);
        assert_eq!(store.verify_code_at("x@y.z", &code, t0()), VerifyOutcome::NotFound);
    }

    #[test]
    fn test_challenge_lifecycle() {
        let store = ProxyStore::new();
        let c = store.issue_challenge_at(ChallengeKind::Registration, Some("u1"), t0());
        assert_eq!(URL_SAFE_NO_PAD.decode(&c.challenge).unwrap().len(), CHALLENGE_BYTES);

        assert!(store
            .consume_challenge_at(&c.challenge, ChallengeKind::Authentication, t0())
            .is_none());
        // A mismatched kind still consumes it.
        assert_eq!(store.pending_challenges(), 0);

        let c = store.issue_challenge_at(ChallengeKind::Authentication, None, t0());
        let taken = store
            .consume_challenge_at(&c.challenge, ChallengeKind::Authentication, t0() + ChronoDuration::minutes(4))
            .unwrap();
        assert_eq!(taken.kind, ChallengeKind::Authentication);
    }

    #[test]
    fn test_revoke_code() {
        let store = ProxyStore::new();
        let (code, _) = store.issue_code_at("ada@campus.edu", t0());
        assert!(store.revoke_code(" Ada@Campus.edu"));
        assert!(!store.revoke_code("ada@campus.edu"));
        assert_eq!(store.verify_code_at("ada@campus.edu", &code, t0()), VerifyOutcome::NotFound);
    }

    #[test]
    fn test_purge() {
        let store = ProxyStore::new();
        store.issue_code_at("a@b.c", t0());
        store.issue_challenge_at(ChallengeKind::Registration, None, t0());
        assert_eq!(store.purge_expired_at(t0() + ChronoDuration::minutes(6)), 1);
        assert_eq!(store.purge_expired_at(t0() + ChronoDuration::minutes(11)), 1);
    }
}
