use cbc_sdk::{CbcApi, Credentials, HttpClientConfig};
use httpmock::MockServer;

#[allow(dead_code)]
pub const ORG: &str = "ABCD1234";
pub const TOKEN: &str = "SECRETKEY/CONNECTOR1";

/// API handle talking plain HTTP to `server`, without retries.
pub fn api(server: &MockServer) -> CbcApi {
    CbcApi::builder()
        .credentials(Credentials::new(server.base_url(), TOKEN, ORG))
        .http_config(HttpClientConfig::for_testing())
        .build()
        .unwrap()
}
