// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `POST /translate`

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{json_body, required, AppState};
use crate::cloud::translate::{is_passthrough, SOURCE_LANGUAGE};
use crate::errors::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub text: Option<String>,
    pub target_language: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub translated_text: String,
}

pub async fn translate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> ApiResult<Json<TranslateResponse>> {
    let request = json_body(payload)?;
    let text = required(request.text, "text")?;
    let target = request
        .target_language
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| SOURCE_LANGUAGE.to_string());

    if is_passthrough(&target) {
        return Ok(Json(TranslateResponse { translated_text: text }));
    }

    let Some(client) = state.translate.as_ref() else {
        tracing::debug!(target = %target, "no translation provider configured, echoing text");
        return Ok(Json(TranslateResponse { translated_text: text }));
    };

    let translated_text = client.translate(&text, &target).await?;
    Ok(Json(TranslateResponse { translated_text }))
}
