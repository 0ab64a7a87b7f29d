use crate::config::{ExponentialBackoff, RetryConfig, RetryTrigger};
use crate::error::HttpError;
use crate::response::{ResponseBody, parse_retry_after};
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

/// Attempt number on retried requests, starting at 1
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

/// Retries failed attempts with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryLayer {
    config: RetryConfig,
    total_timeout: Option<Duration>,
}

impl RetryLayer {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            total_timeout: None,
        }
    }

    /// Fail with `DeadlineExceeded` once `total_timeout` has passed,
    /// no matter how many retries remain
    #[must_use]
    pub fn with_total_timeout(config: RetryConfig, total_timeout: Option<Duration>) -> Self {
        Self {
            config,
            total_timeout,
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
            total_timeout: self.total_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
    total_timeout: Option<Duration>,
}

/// Deadline plus the timeout it was derived from, for the error message
type Deadline = Option<(Instant, Duration)>;

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Use the instance that was poll_ready'd; keep a fresh clone for next time.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let deadline: Deadline = self.total_timeout.map(|t| (Instant::now() + t, t));

        let (parts, body) = req.into_parts();
        let version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = Arc::new(parts);

        Box::pin(async move {
            let method = parts.method.clone();
            let host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);

            let mut attempt = 0usize;
            loop {
                if let Some((at, timeout)) = deadline
                    && Instant::now() >= at
                {
                    return Err(HttpError::DeadlineExceeded(timeout));
                }

                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = version;
                *req.extensions_mut() = extensions.clone();
                if attempt > 0
                    && let Ok(value) = HeaderValue::try_from(attempt.to_string())
                {
                    req.headers_mut().insert(RETRY_ATTEMPT_HEADER, value);
                }

                let mut svc = inner.clone();
                svc.ready().await?;
                let exhausted = attempt >= config.max_retries;

                match svc.call(req).await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let trigger = RetryTrigger::Status(status);
                        if exhausted || !config.should_retry(trigger, &method) {
                            return Ok(resp);
                        }

                        let retry_after = parse_retry_after(resp.headers())
                            .filter(|_| !config.ignore_retry_after);
                        let backoff = retry_after
                            .unwrap_or_else(|| calculate_backoff(&config.backoff, attempt));

                        if let Err(e) = drain_body(resp, config.drain_limit).await {
                            tracing::debug!(
                                error = %e,
                                "failed to drain response body before retry"
                            );
                        }

                        let backoff = clamp_to_deadline(backoff, deadline)?;
                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = config.max_retries,
                            status,
                            trigger = ?trigger,
                            method = %method,
                            host = %host,
                            backoff_ms = backoff.as_millis(),
                            retry_after_used = retry_after.is_some(),
                            "retrying request after status code"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => {
                        let trigger = retry_trigger(&err);
                        if exhausted || !config.should_retry(trigger, &method) {
                            return Err(err);
                        }

                        let backoff =
                            clamp_to_deadline(calculate_backoff(&config.backoff, attempt), deadline)?;
                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = config.max_retries,
                            error = %err,
                            trigger = ?trigger,
                            method = %method,
                            host = %host,
                            backoff_ms = backoff.as_millis(),
                            "retrying request after error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
                attempt += 1;
            }
        })
    }
}

fn clamp_to_deadline(backoff: Duration, deadline: Deadline) -> Result<Duration, HttpError> {
    let Some((at, timeout)) = deadline else {
        return Ok(backoff);
    };
    let remaining = at.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(HttpError::DeadlineExceeded(timeout));
    }
    Ok(backoff.min(remaining))
}

/// Read up to `limit` bytes so the connection can go back to the pool.
/// A body declared larger than the limit is dropped unread.
async fn drain_body(response: Response<ResponseBody>, limit: usize) -> Result<(), HttpError> {
    let declared = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Ok(());
    }

    let mut body = std::pin::pin!(response.into_body());
    let mut drained = 0usize;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }
    Ok(())
}

fn retry_trigger(err: &HttpError) -> RetryTrigger {
    match err {
        HttpError::Transport(_) => RetryTrigger::TransportError,
        HttpError::Timeout(_) => RetryTrigger::Timeout,
        _ => RetryTrigger::NonRetryable,
    }
}

/// Delay before retry number `attempt + 1`
///
/// Non-finite or negative settings fall back to safe values instead of
/// panicking in `Duration::from_secs_f64`.
pub(crate) fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    const CEILING_SECS: f64 = 3600.0;

    let sane = |v: f64, fallback: f64| if v.is_finite() && v >= 0.0 { v } else { fallback };
    let multiplier = sane(backoff.multiplier, 1.0);
    let initial = sane(backoff.initial.as_secs_f64(), 0.0);
    let max = sane(backoff.max.as_secs_f64(), CEILING_SECS).min(CEILING_SECS);

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = initial * multiplier.powi(exponent);
    let secs = if raw.is_finite() { raw.clamp(0.0, max) } else { max };
    let delay = Duration::from_secs_f64(secs);

    if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        delay + delay.mul_f64(factor)
    } else {
        delay
    }
}
