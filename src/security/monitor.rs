// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session monitor: owns the periodic poller and the activity subscription.
//!
//! Both run as tokio tasks. [`SessionMonitor::shutdown`] or dropping the
//! monitor aborts them; the poller also stops on its own once the session
//! has expired or been terminated.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::activity::{InteractionEvent, SessionActivityTracker};
use super::session_manager::{SessionTimeoutStateMachine, Transition};

/// Running background tasks for one session.
pub struct SessionMonitor {
    poller: JoinHandle<()>,
    tracker: JoinHandle<()>,
}

impl SessionMonitor {
    /// Start polling `session` and consuming `events`.
    ///
    /// The first evaluation runs immediately, then every
    /// `poll_interval_secs` from the session config.
    pub fn start(
        session: Arc<SessionTimeoutStateMachine>,
        events: mpsc::Receiver<InteractionEvent>,
    ) -> Self {
        let tracker = SessionActivityTracker::new(session.clone()).spawn(events);

        let period = Duration::from_secs(session.config().poll_interval_secs.max(1));
        let poller = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Transition::Expired { .. } = session.poll().await {
                    tracing::debug!("session expired; poller stopped");
                    break;
                }
                // Ended elsewhere: sign-out, a newer session or a resume check.
                if session.is_expired() {
                    tracing::debug!("session ended; poller stopped");
                    break;
                }
            }
        });

        Self { poller, tracker }
    }

    /// Whether the poller is still running.
    pub fn is_running(&self) -> bool {
        !self.poller.is_finished()
    }

    /// Stop both tasks.
    pub fn shutdown(&self) {
        self.poller.abort();
        self.tracker.abort();
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
