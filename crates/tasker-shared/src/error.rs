//! # Crate-wide Error Types
//!
//! `TaskerError` is the error currency that crosses module boundaries:
//! ports, the step executor, the dispatcher, and the DLQ handler all
//! converge on it so callers never have to match on a dozen distinct
//! error types to decide whether something is worth retrying.

use thiserror::Error;

/// Crate-wide result alias.
pub type TaskerResult<T> = Result<T, TaskerError>;

/// Unified error type for the workflow runtime.
#[derive(Debug, Error)]
pub enum TaskerError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("step name conflict in run {run_id}: {step_name}")]
    StepNameConflict { run_id: uuid::Uuid, step_name: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("adapter error ({adapter}): {message}")]
    Adapter {
        adapter: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskerError {
    /// Whether this error represents a transient condition worth retrying
    /// the surrounding operation (not the same as a workflow step's error
    /// classification in [`crate::retry`], but the two agree in spirit).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TaskerError::BackendUnavailable(_) | TaskerError::Adapter { .. }
        )
    }

    /// Whether the HTTP ingress or a caller one layer up should treat this
    /// as worth retrying rather than surfacing to the user immediately.
    /// Agrees with [`Self::is_recoverable`] plus `NotFound`, which is
    /// retryable in the narrow case of a row not yet visible to a
    /// read-replica.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_recoverable() || matches!(self, TaskerError::NotFound(_))
    }

    #[must_use]
    pub fn adapter(adapter: impl Into<String>, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        TaskerError::Adapter {
            adapter: adapter.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
