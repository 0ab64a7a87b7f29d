#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP client for the Carbon Black Cloud REST API
//!
//! A hyper client wrapped in a tower middleware stack:
//! - TLS via rustls (HTTPS only by default), with optional TLS 1.2 pinning
//!   and optional certificate verification bypass for lab deployments
//! - Per-attempt timeouts and an optional total deadline
//! - Retries with exponential backoff, honouring `Retry-After`
//! - `User-Agent` and `X-Auth-Token` header injection
//! - Transparent response decompression (gzip, brotli, deflate)
//!
//! Body size limits apply to decompressed bytes.
//!
//! # Example
//!
//! ```ignore
//! use cbc_http::HttpClient;
//! use secrecy::SecretString;
//!
//! let client = HttpClient::builder()
//!     .user_agent("my-integration/1.0")
//!     .with_api_token(&SecretString::from("SECRET/CONNECTOR"))?
//!     .build()?;
//!
//! let devices: serde_json::Value = client
//!     .get("https://defense.conferdeploy.net/integrationServices/v3/device")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod layers;
mod request;
mod response;
mod tls;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig, RetryConfig, RetryTrigger,
    TlsConfig, TlsRootConfig, TransportSecurity, is_idempotent_method,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{
    API_TOKEN_HEADER, ApiTokenLayer, ApiTokenService, RETRY_ATTEMPT_HEADER, RetryLayer,
    RetryService, UserAgentLayer, UserAgentService,
};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody};
