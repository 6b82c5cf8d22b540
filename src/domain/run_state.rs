//! In-memory state for one harvesting run.
//!
//! One `RunState` lives for the duration of a single invocation and is owned
//! exclusively by the running loop; cancellation is the only part visible
//! from outside, exposed as a [`CancelHandle`] that flips one token.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Phases of the incremental-loader state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderPhase {
    Idle,
    Scrolling,
    Extracting,
    GrowthDetected,
    NoGrowth,
    Drained,
    Cancelled,
}

/// Mutable state of a single harvesting invocation.
#[derive(Debug)]
pub struct RunState {
    pub run_id: Uuid,
    pub phase: LoaderPhase,
    /// Consecutive cycles without scrollable-height growth.
    pub attempts_without_growth: u32,
    /// Records processed this run plus the caller-supplied existing count.
    pub total_processed: u64,
    /// Items skipped because no name could be resolved.
    pub skipped: u64,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: LoaderPhase::Idle,
            attempts_without_growth: 0,
            total_processed: 0,
            skipped: 0,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for requesting cancellation from outside the run loop.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Polled by the loop between items and between cycles.
    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records a growth measurement and reports whether the run is drained.
    pub fn observe_growth(&mut self, grew: bool, max_attempts: u32) -> bool {
        if grew {
            self.phase = LoaderPhase::GrowthDetected;
            self.attempts_without_growth = 0;
            false
        } else {
            self.phase = LoaderPhase::NoGrowth;
            self.attempts_without_growth += 1;
            self.attempts_without_growth >= max_attempts
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation handle detached from the run loop. Settable at any time; the
/// loop observes it at its next poll point.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_handle_flips_run_state() {
        let state = RunState::new();
        assert!(!state.cancel_requested());

        let handle = state.cancel_handle();
        handle.cancel();
        assert!(state.cancel_requested());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn growth_resets_attempt_counter() {
        let mut state = RunState::new();
        assert!(!state.observe_growth(false, 3));
        assert!(!state.observe_growth(false, 3));
        assert_eq!(state.attempts_without_growth, 2);

        assert!(!state.observe_growth(true, 3));
        assert_eq!(state.attempts_without_growth, 0);
        assert_eq!(state.phase, LoaderPhase::GrowthDetected);
    }

    #[test]
    fn run_drains_at_attempt_ceiling() {
        let mut state = RunState::new();
        assert!(!state.observe_growth(false, 2));
        assert!(state.observe_growth(false, 2));
        assert_eq!(state.phase, LoaderPhase::NoGrowth);
    }
}
