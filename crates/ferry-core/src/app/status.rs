//! Status - 運用向けのスナップショット（`GET /status`）

use serde::{Deserialize, Serialize};

use crate::domain::RunState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    /// Runs whose record is locked by a transition in progress.
    pub busy: usize,
    /// Entries in the identity registry.
    pub live_instances: usize,
}

impl StatusView {
    pub fn count(&mut self, state: RunState) {
        match state {
            RunState::Queued => self.queued += 1,
            RunState::Running => self.running += 1,
            RunState::Completed => self.completed += 1,
        }
    }
}
