//! Unpaginated list endpoints.
//!
//! Feeds, reports and watchlists come back whole in one reply, so these
//! queries only collect parameters and issue a single GET from `all`.

use std::sync::Arc;

use cbc_query::{ApiRequest, Model, QueryError, Row};
use serde_json::Value;

use crate::api::Connection;
use crate::error::CbcError;
use crate::models::{Feed, Report, Watchlist};

const FEED_ID: &str = "feed_id";

/// Pulls `results` out of a list reply, skipping anything that is not an object.
fn results<M: Model>(mut body: Row) -> Vec<M> {
    match body.remove("results") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(M::from_row(row)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn merge_param(params: &mut Vec<(String, String)>, key: String, value: String) {
    match params.iter_mut().find(|(k, _)| *k == key) {
        Some(existing) => existing.1 = value,
        None => params.push((key, value)),
    }
}

/// Threat intelligence feeds of the organization.
pub struct FeedQuery {
    connection: Arc<Connection>,
    params: Vec<(String, String)>,
}

impl FeedQuery {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            params: Vec::new(),
        }
    }

    /// Sets a request parameter, replacing an earlier value for `key`.
    #[must_use]
    pub fn where_(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        merge_param(&mut self.params, key.into(), value.into());
        self
    }

    /// Also lists public feeds, not only the organization's own.
    #[must_use]
    pub fn include_public(self, include: bool) -> Self {
        self.where_("include_public", include.to_string())
    }

    /// # Errors
    /// Returns [`CbcError::Api`] for a non-success status.
    pub async fn all(&self) -> Result<Vec<Feed>, CbcError> {
        let mut request = ApiRequest::get(format!(
            "/threathunter/feedmgr/v2/orgs/{}/feeds",
            self.connection.org_key
        ));
        request.query.clone_from(&self.params);
        Ok(results(self.connection.call(request).await?))
    }
}

/// Reports of one feed. The feed must be chosen before `all`.
pub struct ReportQuery {
    connection: Arc<Connection>,
    feed_id: Option<String>,
    params: Vec<(String, String)>,
}

impl ReportQuery {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            feed_id: None,
            params: Vec::new(),
        }
    }

    /// Sets a request parameter; `feed_id` selects the feed instead.
    #[must_use]
    pub fn where_(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key == FEED_ID {
            self.feed_id = Some(value.into());
        } else {
            merge_param(&mut self.params, key, value.into());
        }
        self
    }

    #[must_use]
    pub fn feed_id(self, feed_id: impl Into<String>) -> Self {
        self.where_(FEED_ID, feed_id)
    }

    /// # Errors
    /// Returns [`QueryError::Usage`] when no feed is selected and
    /// [`CbcError::Api`] for a non-success status.
    pub async fn all(&self) -> Result<Vec<Report>, CbcError> {
        let feed_id = self.feed_id.as_deref().ok_or_else(|| {
            QueryError::Usage(format!("required parameter {FEED_ID} missing"))
        })?;
        let mut request = ApiRequest::get(format!(
            "/threathunter/feedmgr/v2/orgs/{}/feeds/{feed_id}/reports",
            self.connection.org_key
        ));
        request.query.clone_from(&self.params);
        Ok(results(self.connection.call(request).await?))
    }
}

/// Watchlists visible to the credentials.
pub struct WatchlistQuery {
    connection: Arc<Connection>,
}

impl WatchlistQuery {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// # Errors
    /// Returns [`CbcError::Api`] for a non-success status.
    pub async fn all(&self) -> Result<Vec<Watchlist>, CbcError> {
        let request = ApiRequest::get("/threathunter/watchlistmgr/v2/watchlist");
        Ok(results(self.connection.call(request).await?))
    }
}
