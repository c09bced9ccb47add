// error.rs — Error types for the goal lifecycle subsystem.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during goal lifecycle operations.
#[derive(Debug, Error)]
pub enum GoalError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize goal data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The requested goal instance was not found.
    #[error("goal instance not found: {0}")]
    NotFound(Uuid),

    /// The state machine refused the transition (e.g. leaving a terminal state).
    #[error("invalid transition from {from} to {to} for goal {goal_id}")]
    InvalidTransition {
        goal_id: Uuid,
        from: String,
        to: String,
    },

    /// A goal template violates a configuration invariant.
    #[error("invalid goal template {name}: {reason}")]
    InvalidTemplate { name: String, reason: String },

    /// Two templates were registered under the same unique name.
    #[error("goal {0} is already registered")]
    DuplicateGoal(String),

    /// A notification dispatch failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}
