use crate::config::{ExponentialBackoff, RetryConfig, RetryTrigger};
use crate::error::HttpError;
use crate::response::{ResponseBody, parse_retry_after};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Tower layer that re-sends failed attempts with exponential backoff
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
}

impl RetryLayer {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Retries `Err(HttpError)` attempts and, when configured, selected statuses.
///
/// The request is rebuilt from its parts and buffered body for every
/// attempt. After retries are exhausted the last outcome is returned as is:
/// `Ok(Response)` for any status, `Err` for transport failures and timeouts.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
}

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
        // consume the instance that was poll_ready'd
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();

        let (parts, body) = req.into_parts();
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
                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.extensions_mut() = extensions.clone();

                let mut svc = inner.clone();
                svc.ready().await?;

                match svc.call(req).await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let trigger = RetryTrigger::Status(status);
                        if attempt >= config.max_retries || !config.should_retry(trigger, &method)
                        {
                            return Ok(resp);
                        }

                        let retry_after = if config.ignore_retry_after {
                            None
                        } else {
                            parse_retry_after(resp.headers())
                                .map(|delay| delay.min(config.backoff.max))
                        };
                        let backoff = retry_after
                            .unwrap_or_else(|| calculate_backoff(&config.backoff, attempt));

                        if let Err(e) =
                            drain_response_body(resp, config.retry_response_drain_limit).await
                        {
                            tracing::debug!(error = %e, "failed to drain body before retry");
                        }

                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = config.max_retries,
                            status,
                            method = %method,
                            host = %host,
                            backoff_ms = backoff.as_millis(),
                            retry_after_used = retry_after.is_some(),
                            "retrying request after status code"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => {
                        let trigger = get_retry_trigger(&err);
                        if attempt >= config.max_retries || !config.should_retry(trigger, &method)
                        {
                            return Err(err);
                        }

                        let backoff = calculate_backoff(&config.backoff, attempt);
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

/// Read and discard up to `limit` bytes so the connection can go back to the pool
async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<(), HttpError> {
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

fn get_retry_trigger(err: &HttpError) -> RetryTrigger {
    match err {
        HttpError::Transport(_) => RetryTrigger::TransportError,
        HttpError::Timeout(_) => RetryTrigger::Timeout,
        _ => RetryTrigger::NonRetryable,
    }
}

/// Backoff for the zero-based `attempt`, sanitized against NaN/negative settings
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let raw = backoff.initial.as_secs_f64() * multiplier.powi(exponent);
    let clamped = if raw.is_finite() {
        raw.clamp(0.0, max_secs)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(factor)
    } else {
        duration
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::sync::Mutex;

    fn empty_body() -> ResponseBody {
        Full::new(Bytes::new())
            .map_err(|never| match never {})
            .boxed()
    }

    fn request(method: Method) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("https://gitee.com/oauth/token")
            .body(Full::new(Bytes::from_static(b"grant_type=authorization_code")))
            .unwrap()
    }

    /// Fails the first `failures` calls with a transport error, then answers 200
    #[derive(Clone)]
    struct Flaky {
        calls: Arc<Mutex<usize>>,
        failures: usize,
        bodies: Arc<Mutex<Vec<Bytes>>>,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                calls: Arc::new(Mutex::new(0)),
                failures,
                bodies: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Service<Request<Full<Bytes>>> for Flaky {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            let failures = self.failures;
            let bodies = Arc::clone(&self.bodies);
            Box::pin(async move {
                let body = req.into_body().collect().await.unwrap().to_bytes();
                bodies.lock().unwrap().push(body);
                if n <= failures {
                    return Err(HttpError::Transport("connection reset".into()));
                }
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .body(empty_body())
                    .unwrap())
            })
        }
    }

    /// Answers a fixed status on every call
    #[derive(Clone)]
    struct FixedStatus {
        calls: Arc<Mutex<usize>>,
        status: StatusCode,
        retry_after: &'static str,
    }

    impl Service<Request<Full<Bytes>>> for FixedStatus {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Full<Bytes>>) -> Self::Future {
            *self.calls.lock().unwrap() += 1;
            let status = self.status;
            let retry_after = self.retry_after;
            Box::pin(async move {
                Ok(Response::builder()
                    .status(status)
                    .header(http::header::RETRY_AFTER, retry_after)
                    .body(empty_body())
                    .unwrap())
            })
        }
    }

    fn fast(retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries: retries,
            backoff: ExponentialBackoff::fast(),
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn post_succeeds_on_third_attempt() {
        let inner = Flaky::new(2);
        let mut svc = RetryLayer::new(fast(2)).layer(inner.clone());

        let resp = svc
            .ready()
            .await
            .unwrap()
            .call(request(Method::POST))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(inner.calls(), 3);
        // every attempt carried the full form body
        let bodies = inner.bodies.lock().unwrap();
        assert!(bodies.iter().all(|b| &b[..] == b"grant_type=authorization_code"));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Flaky::new(10);
        let mut svc = RetryLayer::new(fast(2)).layer(inner.clone());

        let err = svc
            .ready()
            .await
            .unwrap()
            .call(request(Method::GET))
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Transport(_)));
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn idempotent_only_leaves_post_alone() {
        let inner = Flaky::new(1);
        let config = RetryConfig {
            idempotent_only: true,
            ..fast(3)
        };
        let mut svc = RetryLayer::new(config).layer(inner.clone());

        let result = svc
            .ready()
            .await
            .unwrap()
            .call(request(Method::POST))
            .await;

        assert!(result.is_err());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn status_retry_requires_trigger() {
        let calls = Arc::new(Mutex::new(0));
        let inner = FixedStatus {
            calls: Arc::clone(&calls),
            status: StatusCode::SERVICE_UNAVAILABLE,
            retry_after: "0",
        };

        let mut plain = RetryLayer::new(fast(2)).layer(inner.clone());
        let resp = plain.ready().await.unwrap().call(request(Method::GET)).await;
        assert_eq!(resp.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(*calls.lock().unwrap(), 1);

        *calls.lock().unwrap() = 0;
        let mut on_503 = RetryLayer::new(fast(2).retry_on_status(503)).layer(inner);
        let resp = on_503.ready().await.unwrap().call(request(Method::GET)).await;
        assert_eq!(resp.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_is_capped_by_max_backoff() {
        let calls = Arc::new(Mutex::new(0));
        let inner = FixedStatus {
            calls: Arc::clone(&calls),
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: "3600",
        };
        let mut svc = RetryLayer::new(fast(1).retry_on_status(429)).layer(inner);

        let started = tokio::time::Instant::now();
        let resp = svc.ready().await.unwrap().call(request(Method::GET)).await;

        assert_eq!(resp.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(started.elapsed() <= ExponentialBackoff::fast().max);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(calculate_backoff(&backoff, 0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&backoff, 1), Duration::from_millis(200));
        assert_eq!(calculate_backoff(&backoff, 5), Duration::from_millis(300));
        assert_eq!(calculate_backoff(&backoff, usize::MAX), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        };
        for _ in 0..50 {
            let d = calculate_backoff(&backoff, 0);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(125));
        }
    }
}
