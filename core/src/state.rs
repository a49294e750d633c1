//! Run lifecycle state machine
//!
//! Every state change of a [`Run`](crate::run::Run) goes through
//! [`RunState::transition`], which only accepts pairs from the table below.
//!
//! ```text
//! pending        -> preparing | preparing_only | cleaning_only | cancelled
//! preparing      -> prepared | failed | cancelled | timeout
//! prepared       -> warming_up | cancelled
//! warming_up     -> running | failed | cancelled | timeout
//! running        -> completed | failed | cancelled | timeout | force_stopped
//! preparing_only -> completed | failed | cancelled | timeout
//! cleaning_only  -> completed | failed | cancelled | timeout
//! ```
//!
//! `preparing_only` and `cleaning_only` carry the one-shot modes, so a run that
//! only prepares or only cleans up still reaches `completed` through the table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, execution not started
    Pending,
    /// Prepare phase running
    Preparing,
    /// Prepare phase finished
    Prepared,
    /// Warm-up phase running
    WarmingUp,
    /// Metrics-bearing run phase
    Running,
    /// One-shot prepare run
    PreparingOnly,
    /// One-shot cleanup run
    CleaningOnly,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by a caller or engine shutdown
    Cancelled,
    /// Phase deadline expired
    Timeout,
    /// Killed on caller request
    ForceStopped,
}

impl RunState {
    /// Every state, in declaration order
    pub const ALL: [RunState; 12] = [
        RunState::Pending,
        RunState::Preparing,
        RunState::Prepared,
        RunState::WarmingUp,
        RunState::Running,
        RunState::PreparingOnly,
        RunState::CleaningOnly,
        RunState::Completed,
        RunState::Failed,
        RunState::Cancelled,
        RunState::Timeout,
        RunState::ForceStopped,
    ];

    /// Legal successors of this state
    pub fn successors(&self) -> &'static [RunState] {
        use RunState::*;
        match self {
            Pending => &[Preparing, PreparingOnly, CleaningOnly, Cancelled],
            Preparing => &[Prepared, Failed, Cancelled, Timeout],
            Prepared => &[WarmingUp, Cancelled],
            WarmingUp => &[Running, Failed, Cancelled, Timeout],
            Running => &[Completed, Failed, Cancelled, Timeout, ForceStopped],
            PreparingOnly | CleaningOnly => &[Completed, Failed, Cancelled, Timeout],
            Completed | Failed | Cancelled | Timeout | ForceStopped => &[],
        }
    }

    /// Whether `self -> to` appears in the transition table
    pub fn can_transition(&self, to: RunState) -> bool {
        self.successors().contains(&to)
    }

    /// Validate `self -> to`
    pub fn transition(&self, to: RunState) -> Result<RunState, StateError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(StateError::InvalidTransition { from: *self, to })
        }
    }

    /// Whether no transition leaves this state
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// Whether a caller may stop a run in this state
    pub fn is_stoppable(&self) -> bool {
        matches!(self, RunState::Running | RunState::WarmingUp)
    }

    /// Snake-case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Preparing => "preparing",
            RunState::Prepared => "prepared",
            RunState::WarmingUp => "warming_up",
            RunState::Running => "running",
            RunState::PreparingOnly => "preparing_only",
            RunState::CleaningOnly => "cleaning_only",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
            RunState::Timeout => "timeout",
            RunState::ForceStopped => "force_stopped",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StateError::UnknownState(s.to_string()))
    }
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Transition not present in the table
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },

    /// Unrecognized state name
    #[error("unknown run state: {0}")]
    UnknownState(String),
}

impl From<StateError> for crate::error::BenchError {
    fn from(err: StateError) -> Self {
        crate::error::BenchError::invalid_state(err.to_string())
    }
}
