// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `POST /chat` - role-aware study assistant.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{json_body, AppState};
use crate::cloud::Message;
use crate::errors::{ApiResult, UserError};
use crate::router::{Role, RoleSet};

const STUDENT_PROMPT: &str = "You are a patient study assistant for students. Explain concepts step by step, \
ask guiding questions, and never simply hand over answers to graded work.";

const EDUCATOR_PROMPT: &str = "You are a teaching assistant for educators. Help design lessons, quizzes and \
rubrics, and suggest ways to support students at different levels.";

const ADMIN_PROMPT: &str = "You are an operations assistant for platform administrators. Answer questions \
about managing users, courses and reports concisely and accurately.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    pub user_role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
}

/// System prompt for the caller's most privileged role. Unknown roles get the student prompt.
pub fn system_prompt(user_role: Option<&str>) -> &'static str {
    let role = user_role
        .map(RoleSet::parse)
        .and_then(|roles| roles.highest())
        .unwrap_or(Role::Student);
    match role {
        Role::Admin => ADMIN_PROMPT,
        Role::Educator => EDUCATOR_PROMPT,
        Role::Student => STUDENT_PROMPT,
    }
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let request = json_body(payload)?;

    // Client-supplied system turns are dropped; the role decides the prompt.
    let conversation: Vec<Message> = request
        .messages
        .into_iter()
        .filter(|m| m.role != "system" && !m.content.trim().is_empty())
        .collect();
    if conversation.is_empty() {
        return Err(UserError::missing_field("messages"));
    }

    let client = state
        .chat
        .as_ref()
        .ok_or_else(|| UserError::internal_error("chat provider not configured"))?;

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(Message::system(system_prompt(request.user_role.as_deref())));
    messages.extend(conversation);

    let completion = client.chat(&state.chat_model, messages).await?;
    tracing::info!(
        model = %completion.model,
        prompt_tokens = completion.prompt_tokens,
        completion_tokens = completion.completion_tokens,
        "CHAT_COMPLETED"
    );

    Ok(Json(ChatResponse {
        message: completion.content,
    }))
}
