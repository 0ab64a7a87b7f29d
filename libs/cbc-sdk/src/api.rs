//! The API handle: authenticated connection, queries and object calls.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use cbc_http::{DEFAULT_USER_AGENT, HttpClient, HttpClientBuilder, HttpClientConfig};
use cbc_query::{ApiRequest, ApiResponse, BoxError, Query, Row, SearchKind, Searchable, Transport};
use http::Method;
use serde_json::{Value, json};
use url::Url;

use crate::credentials::Credentials;
use crate::error::CbcError;
use crate::lists::{FeedQuery, ReportQuery, WatchlistQuery};
use crate::models::{Device, Event, Fetchable, Policy};

/// Longest body excerpt kept in an [`CbcError::Api`] message.
const MESSAGE_PREVIEW_LIMIT: usize = 512;

/// HTTP client bound to one tenant.
pub(crate) struct Connection {
    http: HttpClient,
    base: Url,
    pub(crate) org_key: String,
}

impl Connection {
    fn url(&self, request: &ApiRequest) -> Result<Url, CbcError> {
        let mut url = self.base.join(&request.path)?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, CbcError> {
        let url = self.url(request)?;
        tracing::debug!(method = %request.method, path = %request.path, "API request");

        let mut builder = self.http.request(request.method.clone(), url.as_str());
        if let Some(body) = &request.body {
            builder = builder.json(body)?;
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        tracing::trace!(status, bytes = bytes.len(), "API response");

        Ok(ApiResponse {
            status,
            body: parse_body(&bytes),
        })
    }

    /// Sends `request` and returns its JSON object body.
    ///
    /// A 2xx with an empty body yields an empty object.
    pub(crate) async fn call(&self, request: ApiRequest) -> Result<Row, CbcError> {
        let ApiResponse { status, body } = self.send(&request).await?;
        if !(200..300).contains(&status) {
            return Err(CbcError::Api {
                status,
                message: error_message(&body),
            });
        }
        match body {
            Value::Object(row) => Ok(row),
            Value::Null => Ok(Row::new()),
            other => Err(CbcError::Api {
                status,
                message: format!("expected a JSON object, got {}", preview(&other.to_string())),
            }),
        }
    }
}

#[async_trait]
impl Transport for Connection {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, BoxError> {
        self.send(&request).await.map_err(|e| Box::new(e) as BoxError)
    }
}

/// Empty bodies read as `null`; anything that is not JSON is kept as text
/// so error messages can show it.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn error_message(body: &Value) -> String {
    let message = body
        .get("message")
        .or_else(|| body.get("reason"))
        .and_then(Value::as_str);
    match (message, body) {
        (Some(message), _) => message.to_owned(),
        (None, Value::String(text)) => preview(text),
        (None, Value::Null) => "empty response body".to_owned(),
        (None, other) => preview(&other.to_string()),
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(MESSAGE_PREVIEW_LIMIT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_owned(),
    }
}

/// Entry point to the Carbon Black Cloud APIs
///
/// Cheap to clone; clones share one connection pool.
///
/// ```ignore
/// let api = CbcApi::builder()
///     .credentials(Credentials::load(None, None)?)
///     .build()?;
/// let mut devices = api.select::<Device>().where_("hostName", "WIN-7")?;
/// for device in devices.all().await? {
///     println!("{:?}", device.name());
/// }
/// ```
#[derive(Clone)]
pub struct CbcApi {
    connection: Arc<Connection>,
}

impl std::fmt::Debug for CbcApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcApi")
            .field("url", &self.connection.base.as_str())
            .field("org_key", &self.connection.org_key)
            .finish_non_exhaustive()
    }
}

impl CbcApi {
    #[must_use]
    pub fn builder() -> CbcApiBuilder {
        CbcApiBuilder::default()
    }

    /// # Errors
    /// See [`CbcApiBuilder::build`].
    pub fn from_credentials(credentials: Credentials) -> Result<Self, CbcError> {
        Self::builder().credentials(credentials).build()
    }

    #[must_use]
    pub fn org_key(&self) -> &str {
        &self.connection.org_key
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.connection.base
    }

    fn transport(&self) -> Arc<dyn Transport> {
        self.connection.clone()
    }

    /// A lazy query over every `M` the credentials can see.
    #[must_use]
    pub fn select<M: Searchable>(&self) -> Query<M> {
        Query::select(self.transport(), self.org_key())
    }

    /// Raw-row query for an object type given by name, as on a command line.
    ///
    /// # Errors
    /// Returns [`CbcError::NotQueryable`] for types without a paginated
    /// search endpoint.
    pub fn select_named(&self, name: &str) -> Result<Query<Row>, CbcError> {
        let kind = match name {
            "device" => SearchKind::offset(Device::ENDPOINT),
            "event" => SearchKind::offset(Event::ENDPOINT),
            "policy" => SearchKind::offset(Policy::ENDPOINT),
            "enriched_event" => SearchKind::job(self.org_key()),
            other => return Err(CbcError::NotQueryable(other.to_owned())),
        };
        Ok(Query::new(self.transport(), kind))
    }

    /// Fetches one object by id.
    ///
    /// # Errors
    /// Returns [`CbcError::Api`] for a non-success status, or the error of
    /// the failed request.
    pub async fn fetch<M: Fetchable>(&self, id: impl Display) -> Result<M, CbcError> {
        let mut body = self
            .connection
            .call(ApiRequest::get(format!("{}/{id}", M::ENDPOINT)))
            .await?;
        let info = match body.remove(M::INFO_KEY) {
            Some(Value::Object(info)) => info,
            _ => body,
        };
        Ok(M::from_row(info))
    }

    /// # Errors
    /// See [`CbcApi::fetch`].
    pub async fn get_device(&self, device_id: i64) -> Result<Device, CbcError> {
        self.fetch(device_id).await
    }

    /// # Errors
    /// See [`CbcApi::fetch`].
    pub async fn get_event(&self, event_id: &str) -> Result<Event, CbcError> {
        self.fetch(event_id).await
    }

    /// # Errors
    /// See [`CbcApi::fetch`].
    pub async fn get_policy(&self, policy_id: i64) -> Result<Policy, CbcError> {
        self.fetch(policy_id).await
    }

    /// Adds `rule` to a policy and returns the server reply.
    ///
    /// # Errors
    /// Returns [`CbcError::Api`] for a non-success status.
    pub async fn add_policy_rule(&self, policy_id: i64, rule: Row) -> Result<Row, CbcError> {
        let path = format!("{}/{policy_id}/rule", Policy::ENDPOINT);
        self.connection
            .call(ApiRequest::post(path, json!({ "ruleInfo": rule })))
            .await
    }

    /// # Errors
    /// Returns [`CbcError::Api`] for a non-success status.
    pub async fn replace_policy_rule(
        &self,
        policy_id: i64,
        rule_id: i64,
        rule: Row,
    ) -> Result<Row, CbcError> {
        let mut request = ApiRequest::post(
            format!("{}/{policy_id}/rule/{rule_id}", Policy::ENDPOINT),
            json!({ "ruleInfo": rule }),
        );
        request.method = Method::PUT;
        self.connection.call(request).await
    }

    /// # Errors
    /// Returns [`CbcError::Api`] for a non-success status.
    pub async fn delete_policy_rule(&self, policy_id: i64, rule_id: i64) -> Result<(), CbcError> {
        let mut request =
            ApiRequest::get(format!("{}/{policy_id}/rule/{rule_id}", Policy::ENDPOINT));
        request.method = Method::DELETE;
        self.connection.call(request).await.map(|_| ())
    }

    #[must_use]
    pub fn feeds(&self) -> FeedQuery {
        FeedQuery::new(self.connection.clone())
    }

    #[must_use]
    pub fn reports(&self) -> ReportQuery {
        ReportQuery::new(self.connection.clone())
    }

    #[must_use]
    pub fn watchlists(&self) -> WatchlistQuery {
        WatchlistQuery::new(self.connection.clone())
    }
}

/// Builds a [`CbcApi`] from credentials and optional HTTP settings.
#[derive(Default)]
pub struct CbcApiBuilder {
    credentials: Option<Credentials>,
    http_config: Option<HttpClientConfig>,
}

impl CbcApiBuilder {
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replaces the default HTTP settings. The credentials still choose the
    /// request timeout only when no override is given; their TLS settings
    /// always apply.
    #[must_use]
    pub fn http_config(mut self, config: HttpClientConfig) -> Self {
        self.http_config = Some(config);
        self
    }

    /// # Errors
    /// Returns [`CbcError::Credentials`] without credentials,
    /// [`CbcError::Url`] for a malformed server URL and [`CbcError::Http`]
    /// if the HTTP client cannot be built.
    pub fn build(self) -> Result<CbcApi, CbcError> {
        let credentials = self
            .credentials
            .ok_or_else(|| CbcError::Credentials("no credentials supplied".to_owned()))?;
        let base = Url::parse(&credentials.url)?;

        let mut config = match self.http_config {
            Some(config) => config,
            None => HttpClientConfig {
                request_timeout: credentials.default_timeout,
                ..HttpClientConfig::default()
            },
        };
        if !credentials.ssl_verify {
            config.tls.verify_certificates = false;
        }
        if credentials.ssl_force_tls_1_2 {
            config.tls.tls12_only = true;
        }
        if let Some(name) = &credentials.integration_name {
            config.user_agent = format!("{name} {DEFAULT_USER_AGENT}");
        }

        let http = HttpClientBuilder::with_config(config)
            .with_api_token(&credentials.token)?
            .build()?;
        tracing::debug!(
            url = %base,
            org_key = %credentials.org_key,
            connector = ?credentials.connector_id(),
            "CBC API ready"
        );

        Ok(CbcApi {
            connection: Arc::new(Connection {
                http,
                base,
                org_key: credentials.org_key,
            }),
        })
    }
}
