//! The request seam between the query engine and an HTTP client.

use async_trait::async_trait;
use http::Method;
use serde_json::{Map, Value};

use crate::error::{BoxError, QueryError};
use crate::model::Row;

/// Longest body excerpt carried in an upstream error message.
const MESSAGE_PREVIEW_LIMIT: usize = 512;

/// One API call, relative to the server root.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Last value of a query parameter.
    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status code plus parsed JSON body. An empty body parses as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Executes API calls on behalf of a query.
///
/// Implementations return `Ok` for every HTTP status; the engine decides what
/// a non-success status means. `Err` is reserved for failures that produced
/// no response at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, BoxError>;
}

/// A successful response whose body is a JSON object.
#[derive(Debug)]
pub(crate) struct Reply {
    pub(crate) status: u16,
    pub(crate) body: Map<String, Value>,
}

impl Reply {
    pub(crate) fn upstream(&self, message: impl Into<String>) -> QueryError {
        QueryError::Upstream {
            status: self.status,
            message: message.into(),
        }
    }

    /// Removes a list of rows from the body.
    ///
    /// A missing field reads as an empty list; JSON `null` yields `Ok(None)`.
    pub(crate) fn take_rows(&mut self, key: &str) -> Result<Option<Vec<Row>>, QueryError> {
        let items = match self.body.remove(key) {
            None => return Ok(Some(Vec::new())),
            Some(Value::Null) => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(self.upstream(format!(
                    "'{key}' must be an array, got {}",
                    kind_of(&other)
                )));
            }
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(self.upstream(format!(
                    "result rows must be objects, got {}",
                    kind_of(&other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// Sends `request` and insists on a 2xx status with a JSON object body.
pub(crate) async fn fetch_object(
    transport: &dyn Transport,
    request: ApiRequest,
) -> Result<Reply, QueryError> {
    let response = transport
        .request(request)
        .await
        .map_err(QueryError::Transport)?;

    if !(200..300).contains(&response.status) {
        return Err(QueryError::Upstream {
            status: response.status,
            message: error_message(&response.body),
        });
    }

    match response.body {
        Value::Object(body) => Ok(Reply {
            status: response.status,
            body,
        }),
        other => Err(QueryError::Upstream {
            status: response.status,
            message: format!("expected a JSON object, got {}", kind_of(&other)),
        }),
    }
}

/// Best-effort error text from a failure body.
fn error_message(body: &Value) -> String {
    let field = ["message", "error_message", "error", "reason"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str));
    if let Some(message) = field {
        return message.to_owned();
    }
    match body {
        Value::Null => "empty response body".to_owned(),
        Value::String(s) => preview(s),
        other => preview(&other.to_string()),
    }
}

fn preview(text: &str) -> String {
    if text.len() <= MESSAGE_PREVIEW_LIMIT {
        return text.to_owned();
    }
    let mut end = MESSAGE_PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads a non-negative integer field, defaulting to 0.
pub(crate) fn count_field(body: &Map<String, Value>, key: &str) -> usize {
    body.get(key)
        .and_then(Value::as_u64)
        .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX))
}
