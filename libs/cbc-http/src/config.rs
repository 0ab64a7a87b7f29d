use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent sent when the caller does not set one
pub const DEFAULT_USER_AGENT: &str = concat!("cbc-sdk-rs/", env!("CARGO_PKG_VERSION"));

/// Condition under which a request may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryTrigger {
    /// Connection failures, DNS errors and the like
    TransportError,
    /// A single attempt ran past the request timeout
    Timeout,
    /// The server answered with this status code
    Status(u16),
    /// Any error no other trigger covers
    NonRetryable,
}

impl RetryTrigger {
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);
    pub const REQUEST_TIMEOUT: Self = Self::Status(408);
    pub const INTERNAL_SERVER_ERROR: Self = Self::Status(500);
    pub const BAD_GATEWAY: Self = Self::Status(502);
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);
    pub const GATEWAY_TIMEOUT: Self = Self::Status(504);

    /// Status code carried by a `Status` trigger
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Methods safe to repeat without changing server state
#[must_use]
pub fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET
            | http::Method::HEAD
            | http::Method::OPTIONS
            | http::Method::TRACE
            | http::Method::PUT
            | http::Method::DELETE
    )
}

/// Backoff between retry attempts
///
/// Delay for attempt `n` is `initial * multiplier^n`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Add up to 25% random delay
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    /// Short delays, useful in tests
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Retry policy
///
/// Triggers in `always_retry` fire for every method. Triggers in
/// `idempotent_retry` fire only for idempotent methods, so a search job
/// submission (POST) that failed with a 502 is not resubmitted.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub backoff: ExponentialBackoff,
    pub always_retry: HashSet<RetryTrigger>,
    pub idempotent_retry: HashSet<RetryTrigger>,
    /// Use computed backoff even when the server sends `Retry-After`
    pub ignore_retry_after: bool,
    /// Bytes read from a failed response before retrying; larger bodies
    /// are dropped with their connection
    pub drain_limit: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::default(),
            always_retry: HashSet::from([RetryTrigger::TOO_MANY_REQUESTS]),
            idempotent_retry: HashSet::from([
                RetryTrigger::TransportError,
                RetryTrigger::Timeout,
                RetryTrigger::REQUEST_TIMEOUT,
                RetryTrigger::INTERNAL_SERVER_ERROR,
                RetryTrigger::BAD_GATEWAY,
                RetryTrigger::SERVICE_UNAVAILABLE,
                RetryTrigger::GATEWAY_TIMEOUT,
            ]),
            ignore_retry_after: false,
            drain_limit: 64 * 1024,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            always_retry: HashSet::new(),
            idempotent_retry: HashSet::new(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger, method: &http::Method) -> bool {
        if self.always_retry.contains(&trigger) {
            return true;
        }
        is_idempotent_method(method) && self.idempotent_retry.contains(&trigger)
    }
}

/// Source of trusted root certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsRootConfig {
    /// Mozilla roots compiled into the binary
    #[default]
    WebPki,
    /// The operating system certificate store
    Native,
}

/// Whether plain `http://` URLs may be used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    #[default]
    TlsOnly,
    /// For local mock servers; never for a real backend
    AllowInsecureHttp,
}

/// TLS handshake settings
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub roots: TlsRootConfig,
    /// When false, any server certificate is accepted
    pub verify_certificates: bool,
    /// Refuse to negotiate anything but TLS 1.2
    pub tls12_only: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            roots: TlsRootConfig::default(),
            verify_certificates: true,
            tls12_only: false,
        }
    }
}

impl TlsConfig {
    /// True when the stock rustls configuration is enough
    pub(crate) fn is_standard(&self) -> bool {
        self.verify_certificates && !self.tls12_only
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout
    pub request_timeout: Duration,
    /// Deadline for the whole call, retries included
    pub total_timeout: Option<Duration>,
    /// Largest accepted response body, after decompression
    pub max_body_size: usize,
    pub user_agent: String,
    /// `None` disables retries
    pub retry: Option<RetryConfig>,
    pub transport: TransportSecurity,
    pub tls: TlsConfig,
    /// Requests queued ahead of the connection pool
    pub buffer_capacity: usize,
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            total_timeout: None,
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: Some(RetryConfig::default()),
            transport: TransportSecurity::TlsOnly,
            tls: TlsConfig::default(),
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// No retries and a small buffer
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            retry: None,
            buffer_capacity: 64,
            ..Self::default()
        }
    }

    /// Plain HTTP allowed and retries off, for mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry: None,
            transport: TransportSecurity::AllowInsecureHttp,
            ..Self::default()
        }
    }
}
