use cbc_http::HttpError;
use cbc_query::QueryError;
use thiserror::Error;

/// Errors returned by the SDK.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CbcError {
    /// Credentials file or environment could not be read
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A required credential is missing or malformed
    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Query(#[from] QueryError),

    /// Non-success reply to a call outside the query engine
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The named object type has no search endpoint
    #[error("{0} is not a queryable object type")]
    NotQueryable(String),

    /// A background query task panicked or was cancelled
    #[error("background query failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<figment::Error> for CbcError {
    fn from(err: figment::Error) -> Self {
        CbcError::Config(Box::new(err))
    }
}

impl CbcError {
    /// HTTP status of an API or upstream query error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Query(err) => err.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_api_and_query_errors() {
        let api = CbcError::Api {
            status: 404,
            message: "missing".to_owned(),
        };
        assert_eq!(api.status(), Some(404));

        let query: CbcError = QueryError::Upstream {
            status: 502,
            message: "bad gateway".to_owned(),
        }
        .into();
        assert_eq!(query.status(), Some(502));
        assert_eq!(query.to_string(), "upstream error (HTTP 502): bad gateway");

        assert_eq!(CbcError::NotQueryable("ioc".to_owned()).status(), None);
    }
}
