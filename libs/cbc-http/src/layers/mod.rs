//! Tower layers composed by [`crate::HttpClientBuilder`]
//!
//! - [`UserAgentLayer`] sets `User-Agent` unless the request has one
//! - [`ApiTokenLayer`] attaches the `X-Auth-Token` credential
//! - [`RetryLayer`] retries with exponential backoff and jitter

mod api_token;
mod retry;
mod user_agent;

pub use api_token::{API_TOKEN_HEADER, ApiTokenLayer, ApiTokenService};
pub use retry::{RETRY_ATTEMPT_HEADER, RetryLayer, RetryService};
pub use user_agent::{UserAgentLayer, UserAgentService};
