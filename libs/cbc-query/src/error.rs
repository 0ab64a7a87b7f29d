use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by [`Transport`](crate::Transport) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by query construction and execution.
///
/// Usage errors are raised synchronously by the call that violates the query
/// contract. Everything else surfaces from the operation whose request failed;
/// rows already yielded by a stream stay valid.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QueryError {
    /// Invalid call sequence or argument
    #[error("invalid query usage: {0}")]
    Usage(String),

    /// Search job did not complete within the configured timeout
    #[error("search job timed out: {elapsed:?} elapsed, limit {timeout:?}")]
    Timeout { timeout: Duration, elapsed: Duration },

    /// Non-success status or unexpected body shape
    #[error("upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    /// Index outside the result set
    #[error("index {index} out of range for {len} results")]
    Index { index: i64, len: usize },

    /// The transport failed before producing a response
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
}

impl QueryError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Returns true for [`QueryError::Usage`].
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Returns true for [`QueryError::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// HTTP status carried by an upstream error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
