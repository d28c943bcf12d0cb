// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session activity tracking.
//!
//! The UI forwards interaction signals over a channel; the tracker turns the
//! tracked ones into `record_activity` calls on the state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::session_manager::SessionTimeoutStateMachine;

/// Kinds of user interaction the UI can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
    WindowFocus,
}

impl InteractionKind {
    /// Interactions that count as activity unless configured otherwise.
    pub const DEFAULT_TRACKED: [InteractionKind; 6] = [
        InteractionKind::PointerDown,
        InteractionKind::PointerMove,
        InteractionKind::KeyPress,
        InteractionKind::Scroll,
        InteractionKind::TouchStart,
        InteractionKind::Click,
    ];
}

/// One interaction signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    pub at: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn now(kind: InteractionKind) -> Self {
        Self { kind, at: Utc::now() }
    }
}

/// Feeds tracked interactions into the session state machine.
#[derive(Clone)]
pub struct SessionActivityTracker {
    session: Arc<SessionTimeoutStateMachine>,
    tracked: HashSet<InteractionKind>,
}

impl SessionActivityTracker {
    pub fn new(session: Arc<SessionTimeoutStateMachine>) -> Self {
        Self {
            session,
            tracked: InteractionKind::DEFAULT_TRACKED.into_iter().collect(),
        }
    }

    pub fn with_tracked(mut self, kinds: impl IntoIterator<Item = InteractionKind>) -> Self {
        self.tracked = kinds.into_iter().collect();
        self
    }

    pub fn is_tracked(&self, kind: InteractionKind) -> bool {
        self.tracked.contains(&kind)
    }

    /// Handle one event. Returns whether it was recorded as activity.
    pub fn handle(&self, event: InteractionEvent) -> bool {
        if !self.is_tracked(event.kind) {
            return false;
        }
        self.session.record_activity_at(event.at)
    }

    /// Consume events until the sender side closes.
    pub fn spawn(self, mut events: mpsc::Receiver<InteractionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event);
            }
            tracing::debug!("activity channel closed; tracker stopped");
        })
    }
}
