// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Experiment lifecycle states and the static transition table.
//!
//! Every state mutation in the crate consults [`State::can_transition`]
//! before committing; an illegal transition is a precondition failure, never
//! a silent no-op. Centralizing the table here keeps the bulk coordinator,
//! the live experiment actors, and the deletion reaper from drifting apart
//! on what is legal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an experiment.
///
/// Serialized to the database as the uppercase snake-case strings returned
/// by [`State::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Experiment is scheduled and making progress.
    Active,
    /// Experiment is paused; may be reactivated.
    Paused,
    /// A cancel was requested; graceful shutdown in progress.
    StoppingCanceled,
    /// A kill was requested; forced shutdown in progress.
    StoppingKilled,
    /// Experiment finished its workload; finalization in progress.
    StoppingCompleted,
    /// Experiment hit an error; error handling in progress.
    StoppingError,
    /// Terminal: canceled or killed by a user.
    Canceled,
    /// Terminal: finished successfully.
    Completed,
    /// Terminal: failed.
    Error,
    /// Accepted for deletion; the reaper owns it from here.
    Deleting,
    /// Deletion was attempted and failed; may be retried.
    DeleteFailed,
    /// Deletion fully completed; the row is about to disappear.
    Deleted,
}

/// Non-terminal states: further lifecycle commands apply, and the experiment
/// must have a live registry entry.
pub const NON_TERMINAL_STATES: [State; 6] = [
    State::Active,
    State::Paused,
    State::StoppingCanceled,
    State::StoppingKilled,
    State::StoppingCompleted,
    State::StoppingError,
];

/// Terminal states reachable by a running experiment's own lifecycle.
///
/// The deletion-flow states (`Deleting`, `DeleteFailed`, `Deleted`) are also
/// terminal in the registry sense but are never targeted by filters, so they
/// are kept out of this set, matching the store's candidate queries.
pub const TERMINAL_STATES: [State; 3] = [State::Canceled, State::Completed, State::Error];

impl State {
    /// Database string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Active => "ACTIVE",
            State::Paused => "PAUSED",
            State::StoppingCanceled => "STOPPING_CANCELED",
            State::StoppingKilled => "STOPPING_KILLED",
            State::StoppingCompleted => "STOPPING_COMPLETED",
            State::StoppingError => "STOPPING_ERROR",
            State::Canceled => "CANCELED",
            State::Completed => "COMPLETED",
            State::Error => "ERROR",
            State::Deleting => "DELETING",
            State::DeleteFailed => "DELETE_FAILED",
            State::Deleted => "DELETED",
        }
    }

    /// Parse a database string into a state.
    pub fn from_str(s: &str) -> Option<State> {
        match s {
            "ACTIVE" => Some(State::Active),
            "PAUSED" => Some(State::Paused),
            "STOPPING_CANCELED" => Some(State::StoppingCanceled),
            "STOPPING_KILLED" => Some(State::StoppingKilled),
            "STOPPING_COMPLETED" => Some(State::StoppingCompleted),
            "STOPPING_ERROR" => Some(State::StoppingError),
            "CANCELED" => Some(State::Canceled),
            "COMPLETED" => Some(State::Completed),
            "ERROR" => Some(State::Error),
            "DELETING" => Some(State::Deleting),
            "DELETE_FAILED" => Some(State::DeleteFailed),
            "DELETED" => Some(State::Deleted),
            _ => None,
        }
    }

    /// Whether the transition from `self` to `target` is legal.
    ///
    /// Pure and lock-free; this is the single authority on transition
    /// legality. Self-transitions are not legal.
    pub fn can_transition(&self, target: State) -> bool {
        use State::*;
        match (self, target) {
            (Active, Paused)
            | (Active, StoppingCanceled)
            | (Active, StoppingKilled)
            | (Active, StoppingCompleted)
            | (Active, StoppingError) => true,

            (Paused, Active)
            | (Paused, StoppingCanceled)
            | (Paused, StoppingKilled)
            | (Paused, StoppingCompleted)
            | (Paused, StoppingError) => true,

            (StoppingCanceled, Canceled) | (StoppingCanceled, StoppingKilled) => true,
            (StoppingKilled, Canceled) => true,
            (StoppingCompleted, Completed) | (StoppingCompleted, StoppingError) => true,
            (StoppingError, Active) | (StoppingError, Error) => true,

            (Canceled, Deleting) | (Completed, Deleting) | (Error, Deleting) => true,

            (Deleting, Deleted) | (Deleting, DeleteFailed) => true,
            (DeleteFailed, Deleting) => true,

            _ => false,
        }
    }

    /// Whether no further lifecycle command (other than deletion) applies.
    ///
    /// Terminal experiments must not have a live registry entry.
    pub fn is_terminal(&self) -> bool {
        !NON_TERMINAL_STATES.contains(self)
    }

    /// Whether a delete request may move this experiment into `Deleting`.
    pub fn is_deletable(&self) -> bool {
        self.can_transition(State::Deleting)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
