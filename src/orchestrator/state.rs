use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::Mode;

/// The orchestrator's current state. Each variant only carries when it was
/// entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ActiveState {
    Idle { since: DateTime<Utc> },
    Studying { since: DateTime<Utc> },
}

impl ActiveState {
    pub fn entered(mode: Mode) -> Self {
        let since = Utc::now();
        match mode {
            Mode::Idle => ActiveState::Idle { since },
            Mode::Studying => ActiveState::Studying { since },
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ActiveState::Idle { .. } => Mode::Idle,
            ActiveState::Studying { .. } => Mode::Studying,
        }
    }

    pub fn since(&self) -> DateTime<Utc> {
        match self {
            ActiveState::Idle { since } | ActiveState::Studying { since } => *since,
        }
    }
}

/// A delayed pipeline run for a newly seen window.
pub(crate) struct PendingRun {
    pub window: String,
    pub generation: u64,
    pub handle: JoinHandle<()>,
}

pub(crate) struct RuntimeState {
    pub current_window: String,
    pub active: ActiveState,
    pub debounce: Option<PendingRun>,
    pub debounce_generation: u64,
    pub transitions: u64,
    pub started: bool,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            current_window: String::new(),
            active: ActiveState::entered(Mode::Idle),
            debounce: None,
            debounce_generation: 0,
            transitions: 0,
            started: false,
        }
    }
}

impl RuntimeState {
    pub fn cancel_debounce(&mut self) -> Option<String> {
        self.debounce.take().map(|pending| {
            pending.handle.abort();
            pending.window
        })
    }
}

/// Point-in-time view for status output and tests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorSnapshot {
    pub session_id: String,
    pub current_window: String,
    pub active_state: ActiveState,
    pub transitions: u64,
    pub pending_debounce: Option<String>,
    pub cached_windows: usize,
    pub pending_batches: usize,
    pub pending_chars: usize,
}

/// What a single pipeline run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Classified {
        previous: Mode,
        mode: Mode,
        topic: String,
        transitioned: bool,
        batched: bool,
    },
    /// The classification model is missing; nothing was changed.
    Degraded,
    /// The orchestrator shut down before the result could be applied.
    Discarded,
}
