//! Core error types.

use serde_json::Value;
use thiserror::Error;

/// Structural errors raised while building a machine definition.
///
/// These are fatal at construction time: a definition that fails validation
/// never reaches the interpreter.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("state '{state}' is compound but has no initial state")]
    MissingInitial { state: String },

    #[error("initial state '{initial}' of '{state}' is not a child state")]
    InvalidInitial { state: String, initial: String },

    #[error("transition target '{target}' from '{from}' does not resolve to a state")]
    UnknownTarget { from: String, target: String },

    #[error("duplicate state id: {id}")]
    DuplicateId { id: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns an error code suitable for reporting to collaborators.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::MissingInitial { .. } => "MISSING_INITIAL",
            CoreError::InvalidInitial { .. } => "INVALID_INITIAL",
            CoreError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            CoreError::DuplicateId { .. } => "DUPLICATE_ID",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}

/// Error returned by user-supplied action closures (assigners, custom
/// actions, tasks).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub data: Value,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Payload carried by the `error.execution` event built from this error.
    pub fn to_event_data(&self) -> Value {
        serde_json::json!({
            "message": self.message,
            "data": self.data,
        })
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors from the interpreter and the actor runtime.
#[derive(Debug, Clone, Error)]
pub enum ActorError {
    #[error("missing implementation for {kind} '{name}'")]
    MissingImplementation { kind: &'static str, name: String },

    #[error("action failed in actor '{actor}': {message}")]
    ActionExecution {
        actor: String,
        message: String,
        data: Value,
    },

    #[error("actor '{actor}' cannot reach '{target}'")]
    Communication { actor: String, target: String },

    #[error("event '{event}' is not accepted by strict machine '{machine}'")]
    StrictModeViolation { machine: String, event: String },

    #[error("actor '{actor}' has not been started")]
    NotStarted { actor: String },

    #[error("unhandled error in actor '{actor}': {data}")]
    Unhandled { actor: String, data: Value },

    #[error("cannot restore snapshot: {reason}")]
    Restore { reason: String },

    #[error("unexpected snapshot for {logic} logic")]
    SnapshotMismatch { logic: &'static str },
}

impl ActorError {
    /// Returns an error code suitable for reporting to collaborators.
    pub fn error_code(&self) -> &'static str {
        match self {
            ActorError::MissingImplementation { .. } => "MISSING_IMPLEMENTATION",
            ActorError::ActionExecution { .. } => "ACTION_EXECUTION",
            ActorError::Communication { .. } => "ACTOR_COMMUNICATION",
            ActorError::StrictModeViolation { .. } => "STRICT_MODE_VIOLATION",
            ActorError::NotStarted { .. } => "NOT_STARTED",
            ActorError::Unhandled { .. } => "UNHANDLED",
            ActorError::Restore { .. } => "RESTORE",
            ActorError::SnapshotMismatch { .. } => "SNAPSHOT_MISMATCH",
        }
    }

    /// JSON payload used when this error travels as an event.
    pub fn to_event_data(&self) -> Value {
        match self {
            ActorError::ActionExecution { message, data, .. } => serde_json::json!({
                "message": message,
                "data": data,
            }),
            ActorError::Unhandled { data, .. } => data.clone(),
            other => serde_json::json!({
                "code": other.error_code(),
                "message": other.to_string(),
            }),
        }
    }
}
