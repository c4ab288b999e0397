//! # Structured Error Handling
//!
//! Central error type for the execution core. Every component returns explicit
//! `Result` values up to the task scheduler; nothing is allowed to escape as an
//! unhandled fault. All variants are `Clone` so that coalesced cache waiters can
//! each receive the leading computation's error.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;
use crate::scheduler::task::TaskId;

/// Errors surfaced by the execution core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// Invalid or missing configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single provider call failed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Every eligible candidate provider was attempted and failed
    #[error("All providers exhausted (attempted: {})", attempted.join(", "))]
    ProvidersExhausted {
        attempted: Vec<String>,
        last_error: Box<ProviderError>,
    },

    /// No provider was eligible to receive the request (circuits open or empty registry)
    #[error("No eligible provider available")]
    NoEligibleProvider,

    /// Task handler reported a failure
    #[error("Task handler failed: {0}")]
    Handler(String),

    /// No handler registered for the requested task kind
    #[error("No handler registered for task kind '{0}'")]
    HandlerNotRegistered(String),

    /// Task id is unknown to the scheduler
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A dependency of this task failed or was cancelled before it could run
    #[error("Dependency task {0} did not succeed")]
    DependencyFailed(TaskId),

    /// Task state machine rejected a transition
    #[error("Invalid task transition: {0}")]
    InvalidTransition(String),

    /// Task was cancelled by the caller
    #[error("Task cancelled")]
    Cancelled,

    /// Task exceeded its overall deadline
    #[error("Task deadline exceeded")]
    DeadlineExceeded,

    /// The leading computation for a coalesced cache key was dropped before completing
    #[error("Coalesced computation aborted for key {0}")]
    ComputationAborted(String),

    /// Result blob could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse error classification reported at the task status boundary.
///
/// FAILED tasks expose the category of their terminal error without leaking
/// provider internals beyond what the health check already exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// May succeed if attempted again
    Transient,
    /// Will never succeed if retried
    Permanent,
    /// Operation exceeded a configured timeout or deadline
    Timeout,
    /// Every candidate provider failed
    ProviderExhausted,
    /// Task was cancelled by the caller
    Cancelled,
    /// A prerequisite task failed or was cancelled
    DependencyFailed,
}

impl CoreError {
    /// Classify this error for task status reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Provider(e) => {
                if matches!(e, ProviderError::Timeout { .. }) {
                    ErrorCategory::Timeout
                } else if e.is_retryable() {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            CoreError::ProvidersExhausted { .. } => ErrorCategory::ProviderExhausted,
            CoreError::NoEligibleProvider => ErrorCategory::Transient,
            CoreError::DeadlineExceeded => ErrorCategory::Timeout,
            CoreError::Handler(_) | CoreError::ComputationAborted(_) => ErrorCategory::Transient,
            CoreError::Configuration(_)
            | CoreError::HandlerNotRegistered(_)
            | CoreError::TaskNotFound(_)
            | CoreError::InvalidTransition(_)
            | CoreError::Serialization(_) => ErrorCategory::Permanent,
            CoreError::Cancelled => ErrorCategory::Cancelled,
            CoreError::DependencyFailed(_) => ErrorCategory::DependencyFailed,
        }
    }

    /// Whether the task scheduler should spend retry budget on this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Permanent | ErrorCategory::Cancelled | ErrorCategory::DependencyFailed
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
