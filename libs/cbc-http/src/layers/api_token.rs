use crate::error::HttpError;
use http::{HeaderValue, Request};
use secrecy::{ExposeSecret, SecretString};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Header carrying the `SECRET/CONNECTOR_ID` credential
pub const API_TOKEN_HEADER: &str = "X-Auth-Token";

/// Attaches the API token to every request
#[derive(Clone)]
pub struct ApiTokenLayer {
    value: HeaderValue,
}

impl ApiTokenLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the token contains bytes
    /// not allowed in a header
    pub fn try_new(token: &SecretString) -> Result<Self, HttpError> {
        let mut value = HeaderValue::from_str(token.expose_secret())?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl std::fmt::Debug for ApiTokenLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for ApiTokenLayer {
    type Service = ApiTokenService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiTokenService {
            inner,
            value: self.value.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ApiTokenService<S> {
    inner: S,
    value: HeaderValue,
}

impl<S, ReqBody> Service<Request<ReqBody>> for ApiTokenService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        req.headers_mut().insert(API_TOKEN_HEADER, self.value.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Response;
    use http_body_util::Full;
    use std::convert::Infallible;
    use std::future::{Ready, ready};
    use tower::ServiceExt;

    /// Reports the token header value and its sensitivity flag.
    #[derive(Clone)]
    struct InspectToken;

    impl Service<Request<Full<Bytes>>> for InspectToken {
        type Response = Response<Option<(String, bool)>>;
        type Error = Infallible;
        type Future = Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let seen = req.headers().get(API_TOKEN_HEADER).map(|v| {
                (
                    v.to_str().unwrap_or_default().to_owned(),
                    v.is_sensitive(),
                )
            });
            ready(Ok(Response::new(seen)))
        }
    }

    #[tokio::test]
    async fn test_inserts_sensitive_token() {
        let token = SecretString::from("ABCD/1234");
        let svc = ApiTokenLayer::try_new(&token).unwrap().layer(InspectToken);
        let resp = svc
            .oneshot(Request::new(Full::new(Bytes::new())))
            .await
            .unwrap();
        assert_eq!(resp.into_body(), Some(("ABCD/1234".to_owned(), true)));
    }

    #[tokio::test]
    async fn test_replaces_existing_token() {
        let token = SecretString::from("ABCD/1234");
        let svc = ApiTokenLayer::try_new(&token).unwrap().layer(InspectToken);
        let req = Request::builder()
            .header(API_TOKEN_HEADER, "stale/0")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.into_body().unwrap().0, "ABCD/1234");
    }

    #[test]
    fn test_debug_hides_token() {
        let layer = ApiTokenLayer::try_new(&SecretString::from("ABCD/1234")).unwrap();
        assert!(!format!("{layer:?}").contains("ABCD"));
    }
}
