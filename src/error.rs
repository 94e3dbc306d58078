use std::time::Duration;

use thiserror::Error;

/// Crate-wide error taxonomy. Business-logic holds (cron, dependency, quota,
/// fragmentation) are never represented here — they are admission outcomes,
/// not errors. This type only carries what genuinely went wrong while trying
/// to decide or record an outcome.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("transient store error: {message}")]
    Transient {
        message: String,
        /// Suggested backoff before the caller retries.
        retry_after: Duration,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("malformed {what}: {message}")]
    Malformed { what: &'static str, message: String },

    #[error("dependency cycle rejected: {path}")]
    CycleRejected { path: String },
}

impl SchedulerError {
    pub fn transient(message: impl Into<String>, retry_after: Duration) -> Self {
        SchedulerError::Transient {
            message: message.into(),
            retry_after,
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SchedulerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn malformed(what: &'static str, message: impl Into<String>) -> Self {
        SchedulerError::Malformed {
            what,
            message: message.into(),
        }
    }

    /// Whether the tick loop's bounded backoff should retry this error itself,
    /// as opposed to surfacing it to the reconciler harness.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
