use crate::client::{BufferedService, HttpClient};
use crate::config::{HttpClientConfig, RetryConfig, TlsConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::{ApiTokenLayer, RetryLayer, UserAgentLayer};
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use secrecy::SecretString;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

type AuthTransform = Box<dyn FnOnce(InnerService) -> InnerService + Send>;

/// Builds an [`HttpClient`]
///
/// Layers, outermost first:
///
/// ```text
/// Buffer -> Retry -> [auth] -> ApiToken -> Timeout -> UserAgent -> Decompression -> hyper
/// ```
///
/// Authentication sits inside the retry loop so every attempt carries it.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    api_token: Option<ApiTokenLayer>,
    auth_layer: Option<AuthTransform>,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            api_token: None,
            auth_layer: None,
        }
    }

    /// Per-attempt timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Deadline covering every attempt of one call
    #[must_use]
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config.total_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// `None` disables retries
    #[must_use]
    pub fn retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls.roots = roots;
        self
    }

    /// Accept any server certificate
    #[must_use]
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.tls.verify_certificates = !accept;
        self
    }

    #[must_use]
    pub fn tls12_only(mut self, pinned: bool) -> Self {
        self.config.tls.tls12_only = pinned;
        self
    }

    /// Permit `http://` URLs, for local mock servers
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "cbc_http::security",
            "allow_insecure_http() called; HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Send `X-Auth-Token` on every request
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the token is not a valid header value
    pub fn with_api_token(mut self, token: &SecretString) -> Result<Self, HttpError> {
        self.api_token = Some(ApiTokenLayer::try_new(token)?);
        Ok(self)
    }

    /// Wrap the stack with a custom layer inside the retry loop
    #[must_use]
    pub fn with_auth_layer(
        mut self,
        wrap: impl FnOnce(InnerService) -> InnerService + Send + 'static,
    ) -> Self {
        self.auth_layer = Some(Box::new(wrap));
        self
    }

    /// Requests that may queue before `Overloaded` is returned; at least 1
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// # Errors
    /// Returns an error if TLS setup fails (e.g. no usable root certificates)
    /// or the user agent is not a valid header value
    pub fn build(self) -> Result<HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!("insecure HTTP enabled; use only with mock servers");
        }

        let timeout = self.config.request_timeout;
        let https = build_https_connector(&self.config.tls, self.config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout is ignored without a timer
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(UserAgentLayer::try_new(&self.config.user_agent)?)
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        let mut stack: InnerService = service.boxed_clone();
        if let Some(token) = self.api_token {
            stack = token.layer(stack).boxed_clone();
        }
        if let Some(wrap) = self.auth_layer {
            stack = wrap(stack);
        }
        if let Some(retry) = self.config.retry {
            stack = RetryLayer::with_total_timeout(retry, self.config.total_timeout)
                .layer(stack)
                .boxed_clone();
        }

        let service: BufferedService = Buffer::new(stack, self.config.buffer_capacity.max(1));
        Ok(HttpClient {
            service,
            max_body_size: self.config.max_body_size,
            transport: self.config.transport,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

fn build_https_connector(
    tls_config: &TlsConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = if !tls_config.is_standard() || tls_config.roots == TlsRootConfig::Native {
        let client_config = tls::client_config(tls_config).map_err(|e| HttpError::Tls(e.into()))?;
        HttpsConnectorBuilder::new().with_tls_config(client_config)
    } else {
        HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?
    };

    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
