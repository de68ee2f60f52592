//! Structured error types for engine responses.

use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

/// Error categories. Each maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    NotFound,
    Precondition,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Input => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Precondition => 422,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors
    InvalidTaskId,
    InvalidJson,
    ValidationError,

    // Not found errors
    TaskNotFound,
    AgentNotFound,
    NoActiveAssignment,

    // Precondition errors
    AgentInactive,
    TerminalTask,

    // Conflict errors
    VersionConflict,
    IdempotencyKeyReusedWithDifferentRequest,

    // Internal errors
    InternalError,
}

impl ErrorCode {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::InvalidTaskId | ErrorCode::InvalidJson | ErrorCode::ValidationError => {
                ErrorKind::Input
            }
            ErrorCode::TaskNotFound | ErrorCode::AgentNotFound | ErrorCode::NoActiveAssignment => {
                ErrorKind::NotFound
            }
            ErrorCode::AgentInactive | ErrorCode::TerminalTask => ErrorKind::Precondition,
            ErrorCode::VersionConflict | ErrorCode::IdempotencyKeyReusedWithDifferentRequest => {
                ErrorKind::Conflict
            }
            ErrorCode::InternalError => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> u16 {
        self.kind().status()
    }
}

/// Structured error carried from the state machine to the transport.
#[derive(Debug, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> u16 {
        self.code.status()
    }

    /// The `{"error": {...}}` envelope sent to callers.
    pub fn to_body(&self) -> Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        })
    }

    // Convenience constructors

    pub fn invalid_task_id() -> Self {
        Self::new(ErrorCode::InvalidTaskId, "task id is required")
    }

    pub fn invalid_json() -> Self {
        Self::new(ErrorCode::InvalidJson, "request body must be valid json")
    }

    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        let err = Self::new(ErrorCode::ValidationError, message);
        match field {
            Some(field) => err.with_details(json!({ "field": field })),
            None => err,
        }
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, "task not found")
            .with_details(json!({ "taskId": task_id }))
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(ErrorCode::AgentNotFound, "agent not found")
            .with_details(json!({ "agentId": agent_id }))
    }

    pub fn no_active_assignment(task_id: &str) -> Self {
        Self::new(ErrorCode::NoActiveAssignment, "task has no active assignment")
            .with_details(json!({ "taskId": task_id }))
    }

    pub fn agent_inactive(agent_id: &str, status: &str) -> Self {
        Self::new(
            ErrorCode::AgentInactive,
            "agent must be active to accept assignment",
        )
        .with_details(json!({ "agentId": agent_id, "agentStatus": status }))
    }

    pub fn terminal_task(status: &str) -> Self {
        Self::new(
            ErrorCode::TerminalTask,
            format!("cannot change assignment of terminal task ({})", status),
        )
    }

    pub fn version_conflict(current_version: i64) -> Self {
        Self::new(
            ErrorCode::VersionConflict,
            "expectedVersion does not match current version",
        )
        .with_details(json!({ "currentVersion": current_version }))
    }

    pub fn idempotency_key_reused() -> Self {
        Self::new(
            ErrorCode::IdempotencyKeyReusedWithDifferentRequest,
            "Idempotency key already used with a different request payload",
        )
    }

    /// Internal failures never leak their cause to callers.
    pub fn internal(err: impl fmt::Display) -> Self {
        tracing::error!(error = %err, "Unexpected engine failure");
        Self::new(ErrorCode::InternalError, "Unexpected server error")
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Preconditions travel through the db layer as anyhow errors
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => ApiError::internal(err),
        }
    }
}

/// Result type for engine operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
