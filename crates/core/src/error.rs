//! Error types for the quillvault domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all quillvault operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Scheduling errors ---
    #[error("Scheduling error: {0}")]
    Schedule(#[from] ScheduleError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    #[error("Empty input for request {0}")]
    EmptyInput(String),

    #[error("Request {request_id} timed out after {timeout_secs}s")]
    Timeout { request_id: String, timeout_secs: u64 },

    #[error("Request {0} was cancelled by the caller")]
    Cancelled(String),
}

/// Stable wire-level failure codes reported to the caller boundary.
///
/// Every failed settlement carries exactly one of these codes plus a
/// human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Rejected before enqueue: nothing to send to the model.
    EmptyInput,
    /// The engine failed during a job that was not aborting.
    GenerationError,
    /// The ledger deadline fired before any settlement.
    Timeout,
    /// An explicit cancel matched the running chat job.
    Cancelled,
    /// Unexpected failure in the orchestration loop itself.
    QueueError,
}

impl FailureCode {
    /// The stable string form sent across the caller boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::EmptyInput => "EMPTY_INPUT",
            FailureCode::GenerationError => "GENERATION_ERROR",
            FailureCode::Timeout => "TIMEOUT",
            FailureCode::Cancelled => "CANCELLED",
            FailureCode::QueueError => "QUEUE_ERROR",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_displays_correctly() {
        let err = Error::Engine(EngineError::Generation("logits were NaN".into()));
        assert!(err.to_string().contains("logits were NaN"));
    }

    #[test]
    fn timeout_error_carries_duration() {
        let err = Error::Schedule(ScheduleError::Timeout {
            request_id: "req-7".into(),
            timeout_secs: 240,
        });
        assert!(err.to_string().contains("req-7"));
        assert!(err.to_string().contains("240"));
    }

    #[test]
    fn failure_codes_are_stable() {
        assert_eq!(FailureCode::EmptyInput.as_str(), "EMPTY_INPUT");
        assert_eq!(FailureCode::GenerationError.as_str(), "GENERATION_ERROR");
        assert_eq!(FailureCode::Timeout.as_str(), "TIMEOUT");
        assert_eq!(FailureCode::Cancelled.as_str(), "CANCELLED");
        assert_eq!(FailureCode::QueueError.as_str(), "QUEUE_ERROR");
    }

    #[test]
    fn failure_code_serializes_as_wire_string() {
        let json = serde_json::to_string(&FailureCode::QueueError).unwrap();
        assert_eq!(json, "\"QUEUE_ERROR\"");
    }
}
