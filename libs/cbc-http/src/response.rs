use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime};

/// Bytes of a failed response kept in `HttpError::HttpStatus`
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Response body after decompression
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// `Retry-After` as delta-seconds or an HTTP-date still in the future
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(value)
        .ok()?
        .duration_since(SystemTime::now())
        .ok()
}

/// Response returned by [`crate::RequestBuilder::send`]
///
/// Any status counts as a response. The unchecked readers (`bytes`) hand
/// back the body of a 4xx as well; the checked ones (`checked_bytes`,
/// `json`, `text`) turn non-2xx into `HttpError::HttpStatus`.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Fail on non-2xx without reading the body
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` with an empty preview
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }
        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            body_preview: String::new(),
            content_type: content_type(self.inner.headers()),
            retry_after: parse_retry_after(self.inner.headers()),
        })
    }

    /// Whole body, whatever the status
    ///
    /// # Errors
    /// `BodyTooLarge` past `max_body_size`, `Transport` if reading fails
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_limited(self.inner, self.max_body_size).await
    }

    /// Whole body of a 2xx response
    ///
    /// # Errors
    /// As [`Self::bytes`], plus `HttpStatus` for non-2xx
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        read_checked(self.inner, self.max_body_size).await
    }

    /// # Errors
    /// As [`Self::checked_bytes`], plus `Json` if the body does not decode into `T`
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = read_checked(self.inner, self.max_body_size).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// # Errors
    /// As [`Self::checked_bytes`]
    pub async fn text(self) -> Result<String, HttpError> {
        let body = read_checked(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Raw body for streaming; no size limit is applied
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

async fn read_checked(response: Response<ResponseBody>, limit: usize) -> Result<Bytes, HttpError> {
    let status = response.status();
    if status.is_success() {
        return read_limited(response, limit).await;
    }

    let content_type = content_type(response.headers());
    let retry_after = parse_retry_after(response.headers());
    let body_preview = match read_limited(response, limit.min(ERROR_BODY_PREVIEW_LIMIT)).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
        Err(e) => return Err(e),
    };
    Err(HttpError::HttpStatus {
        status,
        body_preview,
        content_type,
        retry_after,
    })
}

async fn read_limited(response: Response<ResponseBody>, limit: usize) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(HttpError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }
    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response(status: u16, body: &'static str) -> HttpResponse {
        let body: ResponseBody = Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|never| match never {})
            .boxed();
        let mut inner = Response::new(body);
        *inner.status_mut() = StatusCode::from_u16(status).unwrap();
        inner
            .headers_mut()
            .insert(http::header::CONTENT_TYPE, "application/json".parse().unwrap());
        HttpResponse {
            inner,
            max_body_size: 64,
        }
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, " 120 ".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_retry_after_rejects_garbage_and_past_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "-5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(
            http::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_retry_after_future_date() {
        let mut headers = HeaderMap::new();
        let later = SystemTime::now() + Duration::from_secs(3600);
        headers.insert(
            http::header::RETRY_AFTER,
            httpdate::fmt_http_date(later).parse().unwrap(),
        );
        let delay = parse_retry_after(&headers).unwrap();
        assert!(delay > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn test_bytes_ignores_status() {
        let body = response(404, r#"{"success":false}"#).bytes().await.unwrap();
        assert_eq!(&body[..], br#"{"success":false}"#);
    }

    #[tokio::test]
    async fn test_json_fails_on_error_status() {
        let err = response(403, "forbidden")
            .json::<serde_json::Value>()
            .await
            .unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                content_type,
                ..
            } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body_preview, "forbidden");
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_body_limit_enforced() {
        let long = "x".repeat(100).leak();
        let err = response(200, long).bytes().await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::BodyTooLarge {
                limit: 64,
                actual: 100
            }
        ));
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(200, "{}").error_for_status().is_ok());
        let err = response(500, "{}").error_for_status().unwrap_err();
        assert!(matches!(err, HttpError::HttpStatus { status, .. } if status.as_u16() == 500));
    }
}
