use std::time::Duration;

use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Why a URL was rejected before any request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// Malformed syntax
    ParseError,
    /// No host
    MissingAuthority,
    /// No `http://` or `https://` prefix
    MissingScheme,
}

/// Everything a request can fail with, from building it to reading the body.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("malformed request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// One attempt ran past `request_timeout`
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// `total_timeout` ran out, retries included
    #[error("gave up after {0:?} including retries")]
    DeadlineExceeded(Duration),

    /// Connect, write or read failure below HTTP
    #[error("connection failed: {0}")]
    Transport(#[source] Cause),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] Cause),

    #[error("response body of {actual} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-2xx status, raised only by the checked body readers
    #[error("server replied {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
        /// Parsed `Retry-After`, if present and valid
        retry_after: Option<Duration>,
    },

    #[error("JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form body: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Every buffer slot is taken
    #[error("too many requests in flight")]
    Overloaded,

    /// The buffer worker has stopped
    #[error("HTTP client is shut down")]
    ServiceClosed,

    /// Match on `kind`; `reason` is for humans.
    #[error("unusable URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Plain `http` while the client is TLS-only
    #[error("scheme '{scheme}' refused: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl From<hyper::Error> for HttpError {
    fn from(cause: hyper::Error) -> Self {
        Self::Transport(cause.into())
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(cause: hyper_util::client::legacy::Error) -> Self {
        Self::Transport(cause.into())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection refused")
        }
    }

    impl Error for Refused {}

    #[test]
    fn test_transport_error_source_downcasts() {
        let err = HttpError::Transport(Box::new(Refused));
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<Refused>().is_some());
        assert_eq!(err.to_string(), "connection failed: connection refused");
    }

    #[test]
    fn test_status_display_uses_preview() {
        let err = HttpError::HttpStatus {
            status: http::StatusCode::UNAUTHORIZED,
            body_preview: "bad token".to_owned(),
            content_type: None,
            retry_after: None,
        };
        assert_eq!(err.to_string(), "server replied 401 Unauthorized: bad token");
    }
}
