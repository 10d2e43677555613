//! Pipeline and session lifecycle states.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle of one capture pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Never started.
    #[default]
    Idle,

    /// Acquiring resources on the caller thread.
    Initializing,

    /// Loop thread is producing data.
    Running,

    /// Stop requested; loop is winding down.
    Stopping,

    /// Stopped and all resources released.
    Stopped,

    /// Setup failed, or the loop hit a fatal error and exited on its own.
    /// Nothing is held; the next stop moves to `Stopped`.
    Error,
}

impl PipelineState {
    /// Returns true if a loop thread may still be alive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running | Self::Stopping)
    }

    /// Returns true if `start` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle | Stopped, Initializing)
                | (Initializing, Running | Error)
                | (Running, Stopping | Error)
                | (Stopping, Stopped)
                | (Error, Stopping | Stopped)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

/// Pipeline state shared between the controlling thread and the loop thread.
#[derive(Debug, Clone)]
pub struct StateCell {
    pipeline: &'static str,
    state: Arc<Mutex<PipelineState>>,
}

impl StateCell {
    pub fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            state: Arc::new(Mutex::new(PipelineState::Idle)),
        }
    }

    pub fn get(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Moves to `next` if the transition is legal. Returns whether it happened.
    pub fn transition_to(&self, next: PipelineState) -> bool {
        let mut state = self.state.lock();
        let previous = *state;
        if !previous.can_transition_to(next) {
            warn!(
                pipeline = self.pipeline,
                previous = previous.name(),
                rejected = next.name(),
                "Ignoring invalid state transition"
            );
            return false;
        }
        *state = next;
        debug!(
            pipeline = self.pipeline,
            previous = previous.name(),
            current = next.name(),
            "Pipeline state transition"
        );
        true
    }
}

/// Aggregate state of a capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Capturing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let cell = StateCell::new("test");
        assert!(cell.transition_to(PipelineState::Initializing));
        assert!(cell.transition_to(PipelineState::Running));
        assert!(cell.transition_to(PipelineState::Stopping));
        assert!(cell.transition_to(PipelineState::Stopped));
        assert!(cell.transition_to(PipelineState::Initializing));
    }

    #[test]
    fn test_error_from_running() {
        let cell = StateCell::new("test");
        assert!(!cell.transition_to(PipelineState::Error));
        assert_eq!(cell.get(), PipelineState::Idle);

        cell.transition_to(PipelineState::Initializing);
        cell.transition_to(PipelineState::Running);
        assert!(cell.transition_to(PipelineState::Error));
        assert!(!cell.get().is_active());
        assert!(cell.transition_to(PipelineState::Stopped));
    }

    #[test]
    fn test_failed_setup_moves_to_error() {
        let cell = StateCell::new("test");
        cell.transition_to(PipelineState::Initializing);
        assert!(cell.transition_to(PipelineState::Error));
        assert!(!cell.get().can_start());
        assert!(!cell.transition_to(PipelineState::Running));

        assert!(cell.transition_to(PipelineState::Stopped));
        assert!(cell.get().can_start());
    }
}
