// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Passkey (WebAuthn) challenge endpoints.
//!
//! Only challenge issuance lives here. The browser performs the ceremony with
//! the returned `publicKey` options and the backend verifies the assertion.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::store::{ChallengeKind, PasskeyChallenge, CHALLENGE_TTL_SECS};
use super::{json_body, required, AppState};
use crate::errors::ApiResult;

/// COSE algorithm ids: ES256 and RS256.
const SUPPORTED_ALGORITHMS: [i64; 2] = [-7, -257];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: String,
    pub public_key: Value,
}

fn timeout_ms() -> i64 {
    CHALLENGE_TTL_SECS * 1000
}

fn registration_options(
    challenge: &PasskeyChallenge,
    rp_id: &str,
    rp_name: &str,
    user_id: &str,
    email: Option<&str>,
    display_name: Option<&str>,
) -> Value {
    let name = email.unwrap_or(user_id);
    let params: Vec<Value> = SUPPORTED_ALGORITHMS
        .iter()
        .map(|alg| json!({ "type": "public-key", "alg": alg }))
        .collect();

    json!({
        "challenge": challenge.challenge,
        "rp": { "id": rp_id, "name": rp_name },
        "user": {
            "id": URL_SAFE_NO_PAD.encode(user_id.as_bytes()),
            "name": name,
            "displayName": display_name.unwrap_or(name),
        },
        "pubKeyCredParams": params,
        "timeout": timeout_ms(),
        "attestation": "none",
        "authenticatorSelection": {
            "residentKey": "preferred",
            "userVerification": "preferred",
        },
    })
}

fn authentication_options(challenge: &PasskeyChallenge, rp_id: &str) -> Value {
    json!({
        "challenge": challenge.challenge,
        "rpId": rp_id,
        "timeout": timeout_ms(),
        "userVerification": "preferred",
    })
}

pub async fn register_challenge(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChallengeRequest>, JsonRejection>,
) -> ApiResult<Json<ChallengeResponse>> {
    let request = json_body(payload)?;
    let user_id = required(request.user_id, "userId")?;

    let challenge = state
        .store
        .issue_challenge_at(ChallengeKind::Registration, Some(&user_id), Utc::now());
    let public_key = registration_options(
        &challenge,
        &state.rp_id,
        &state.rp_name,
        &user_id,
        request.email.as_deref(),
        request.display_name.as_deref(),
    );
    tracing::info!(kind = "registration", "PASSKEY_CHALLENGE_ISSUED");

    Ok(Json(ChallengeResponse {
        challenge: challenge.challenge,
        public_key,
    }))
}

pub async fn authenticate_challenge(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChallengeRequest>, JsonRejection>,
) -> ApiResult<Json<ChallengeResponse>> {
    let request = json_body(payload)?;

    let challenge = state.store.issue_challenge_at(
        ChallengeKind::Authentication,
        request.user_id.as_deref(),
        Utc::now(),
    );
    let public_key = authentication_options(&challenge, &state.rp_id);
    tracing::info!(kind = "authentication", "PASSKEY_CHALLENGE_ISSUED");

    Ok(Json(ChallengeResponse {
        challenge: challenge.challenge,
        public_key,
    }))
}
