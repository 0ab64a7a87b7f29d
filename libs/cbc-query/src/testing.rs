//! Scripted transport shared by the unit tests.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::BoxError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

type Handler = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

/// Answers every request through a closure and records what it was sent.
pub(crate) struct FakeTransport {
    handler: Handler,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Number of recorded requests whose path ends with `suffix`.
    pub(crate) fn hits(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path.ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, BoxError> {
        let response = (self.handler)(&request);
        self.requests.lock().push(request);
        Ok(response)
    }
}

pub(crate) fn ok(body: Value) -> ApiResponse {
    ApiResponse { status: 200, body }
}

/// `[{"id": n}, ...]` for every `n` in `ids`.
pub(crate) fn rows(ids: Range<usize>) -> Value {
    Value::Array(ids.map(|id| json!({ "id": id })).collect())
}

/// Numeric query parameter, 0 when absent.
pub(crate) fn param(request: &ApiRequest, key: &str) -> usize {
    request
        .query_param(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
