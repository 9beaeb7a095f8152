// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tracelab-core.
//!
//! Per-entity errors (precondition failures, not-found) travel inside
//! [`ActionResult`](crate::bulk_action::ActionResult) entries; only
//! request-fatal conditions (malformed filters, unsupported fields, store
//! infrastructure failures) propagate as `Err` from a bulk operation.

use crate::state::State;
use std::fmt;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Wire-level error code classes, mirroring gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Entity does not exist or is not visible to the caller.
    NotFound,
    /// The entity's current state does not permit the operation.
    FailedPrecondition,
    /// The request itself is malformed.
    InvalidArgument,
    /// Infrastructure failure (database, transaction setup).
    Internal,
}

impl ErrorCode {
    /// Wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Core errors that can occur while coordinating experiment actions.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Experiment does not exist, or the caller may not see it.
    ///
    /// Authorization denial is deliberately indistinguishable from
    /// non-existence so that probing IDs leaks nothing.
    ExperimentNotFound {
        /// The experiment ID that was not resolved.
        id: i32,
    },

    /// Experiment is already terminal and cannot take lifecycle commands.
    TerminalState {
        /// The experiment ID.
        id: i32,
    },

    /// The requested state transition is not in the transition table.
    InvalidStateTransition {
        /// The experiment ID.
        id: i32,
        /// Current state.
        from: State,
        /// Requested state.
        to: State,
    },

    /// Experiment is terminal but its state does not permit deletion.
    NotDeletable {
        /// The experiment ID.
        id: i32,
        /// Current state.
        state: State,
    },

    /// Experiment has checkpoints registered as model versions.
    RegisteredModelVersions {
        /// The experiment ID.
        id: i32,
    },

    /// Experiment is already archived.
    AlreadyArchived {
        /// The experiment ID.
        id: i32,
    },

    /// Experiment is not archived.
    NotArchived {
        /// The experiment ID.
        id: i32,
    },

    /// Experiment has not reached a terminal state yet.
    NotTerminal {
        /// The experiment ID.
        id: i32,
    },

    /// Experiment, its project, or its workspace is archived.
    Archived {
        /// The experiment ID.
        id: i32,
    },

    /// Experiment is still running; the operation only applies once it has
    /// reached a terminal state.
    NonTerminalState {
        /// The experiment ID.
        id: i32,
        /// Current state.
        state: State,
    },

    /// The destination project or its workspace is archived.
    DestinationArchived {
        /// The destination project ID.
        project_id: i32,
    },

    /// The referenced project does not exist.
    ProjectNotFound {
        /// The project ID that was not resolved.
        id: i32,
    },

    /// A live handle is already registered for this experiment.
    AlreadyRegistered {
        /// The experiment ID.
        id: i32,
    },

    /// The search expression or structured filter could not be parsed.
    MalformedFilter {
        /// Parse error details.
        details: String,
    },

    /// The filter references a column this core does not support.
    UnsupportedField {
        /// The offending column name.
        field: String,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// The wire-level code class for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ExperimentNotFound { .. } | Self::ProjectNotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyRegistered { .. }
            | Self::TerminalState { .. }
            | Self::InvalidStateTransition { .. }
            | Self::NotDeletable { .. }
            | Self::AlreadyArchived { .. }
            | Self::NotArchived { .. }
            | Self::NotTerminal { .. }
            | Self::Archived { .. }
            | Self::NonTerminalState { .. }
            | Self::DestinationArchived { .. } => ErrorCode::FailedPrecondition,
            Self::RegisteredModelVersions { .. }
            | Self::MalformedFilter { .. }
            | Self::UnsupportedField { .. } => ErrorCode::InvalidArgument,
            Self::Database { .. } => ErrorCode::Internal,
        }
    }

    /// The error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        self.code().as_str()
    }

    /// Whether this error aborts the whole bulk request rather than a
    /// single entity.
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedFilter { .. } | Self::UnsupportedField { .. } | Self::Database { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExperimentNotFound { id } => {
                write!(f, "experiment '{}' not found", id)
            }
            Self::TerminalState { .. } => {
                write!(f, "experiment in terminal state")
            }
            Self::InvalidStateTransition { id, from, to } => {
                write!(
                    f,
                    "illegal state transition {} -> {} for experiment '{}'",
                    from, to, id
                )
            }
            Self::NotDeletable { state, .. } => {
                write!(f, "cannot delete experiment in {} state", state)
            }
            Self::RegisteredModelVersions { .. } => {
                write!(f, "checkpoints are registered as model versions")
            }
            Self::AlreadyArchived { .. } => {
                write!(f, "experiment is already archived")
            }
            Self::NotArchived { .. } => {
                write!(f, "experiment is not archived")
            }
            Self::NotTerminal { .. } => {
                write!(f, "experiment is not in terminal state")
            }
            Self::Archived { .. } => {
                write!(f, "experiment is archived")
            }
            Self::NonTerminalState { state, .. } => {
                write!(
                    f,
                    "experiment in non terminal state '{}', try again later",
                    state
                )
            }
            Self::DestinationArchived { project_id } => {
                write!(f, "destination project '{}' is archived", project_id)
            }
            Self::ProjectNotFound { id } => {
                write!(f, "project '{}' not found", id)
            }
            Self::AlreadyRegistered { id } => {
                write!(f, "experiment '{}' already has a live handle", id)
            }
            Self::MalformedFilter { details } => {
                write!(f, "malformed filter: {}", details)
            }
            Self::UnsupportedField { field } => {
                write!(f, "unsupported filter field '{}'", field)
            }
            Self::Database { operation, details } => {
                write!(f, "database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}
