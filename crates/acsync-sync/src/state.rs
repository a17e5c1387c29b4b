//! Per-terminal sync lifecycle.
//!
//! # Valid Transitions
//!
//! - Uninitialized → Backfilling → Streaming | Polling
//! - Streaming → Polling (reconnect attempts exhausted)
//! - any state except Stopped → Stopped
//!
//! Polling runs on its schedule in every active state; `Polling` only
//! records that the live stream is disabled or gave up, which is permanent
//! until the process restarts.
//!
//! # Examples
//!
//! ```
//! use acsync_sync::{SyncState, SyncStateMachine};
//!
//! let mut machine = SyncStateMachine::new();
//! machine.transition_to(SyncState::Backfilling).unwrap();
//! machine.transition_to(SyncState::Streaming).unwrap();
//! assert!(machine.transition_to(SyncState::Backfilling).is_err());
//! ```

use acsync_core::{Error, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Registered, nothing fetched yet.
    Uninitialized,

    /// Fetching recent history from the terminal.
    Backfilling,

    /// Live stream running, with scheduled polling as fallback.
    Streaming,

    /// Scheduled polling only.
    Polling,

    /// Shut down.
    Stopped,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::Backfilling => "backfilling",
            SyncState::Streaming => "streaming",
            SyncState::Polling => "polling",
            SyncState::Stopped => "stopped",
        };
        write!(f, "{state_str}")
    }
}

impl SyncState {
    /// Check if transition to target state is valid from this state.
    ///
    /// ```
    /// use acsync_sync::SyncState;
    ///
    /// assert!(SyncState::Backfilling.can_transition_to(&SyncState::Polling));
    /// assert!(!SyncState::Polling.can_transition_to(&SyncState::Streaming));
    /// ```
    pub fn can_transition_to(&self, target: &SyncState) -> bool {
        matches!(
            (self, target),
            (SyncState::Uninitialized, SyncState::Backfilling)
                | (SyncState::Backfilling, SyncState::Streaming | SyncState::Polling)
                | (SyncState::Streaming, SyncState::Polling)
                | (
                    SyncState::Uninitialized
                        | SyncState::Backfilling
                        | SyncState::Streaming
                        | SyncState::Polling,
                    SyncState::Stopped
                )
        )
    }

    /// Returns `true` while the terminal is being synced.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Backfilling | SyncState::Streaming | SyncState::Polling
        )
    }
}

#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: SyncState,
    pub to: SyncState,
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: SyncState, to: SyncState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Lifecycle of one terminal's sync, with a bounded transition history.
#[derive(Debug)]
pub struct SyncStateMachine {
    current_state: SyncState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SyncState::Uninitialized,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> SyncState {
        self.current_state
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Move to `new_state`.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` and leaves the state unchanged
    /// if the transition is not allowed.
    pub fn transition_to(&mut self, new_state: SyncState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        if self.history.len() == MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        self.current_state = new_state;
        self.state_entered_at = transition.timestamp;

        Ok(transition)
    }
}
