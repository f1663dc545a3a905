use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::pool::{ConnectionLimiter, route_key};
use crate::request::RequestTemplate;
use crate::response::{HttpResponse, ResponseBody, buffer_response};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tower::Service;
use tower::buffer::Buffer;

/// Future type of the buffered inner service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Pooled HTTP transport.
///
/// `Clone + Send + Sync`; clones share the connection pool and the limiter,
/// so one instance serves every provider client of an application.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) limiter: ConnectionLimiter,
    pub(crate) max_body_size: usize,
    pub(crate) read_timeout: Duration,
    pub(crate) transport_security: TransportSecurity,
}

impl HttpClient {
    /// Client with default configuration.
    ///
    /// # Errors
    /// See [`HttpClientBuilder::build`].
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Limiter shared by all clones of this client
    #[must_use]
    pub fn limiter(&self) -> &ConnectionLimiter {
        &self.limiter
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse, HttpError> {
        let route = route_key(request.uri());
        let method = request.method().clone();

        // held until the body is fully read
        let _lease = self.limiter.acquire(&route).await?;

        let mut service = self.service.clone();
        try_acquire_buffer_slot(&mut service).await?;
        let response = service.call(request).await.map_err(map_buffer_error)?;
        // a stalled body must not pin the lease
        let response = tokio::time::timeout(
            self.read_timeout,
            buffer_response(response, self.max_body_size),
        )
        .await
        .map_err(|_| HttpError::Timeout(self.read_timeout))??;

        tracing::debug!(
            method = %method,
            route = %route,
            status = response.status().as_u16(),
            body_len = response.body().len(),
            "http exchange completed"
        );
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn execute(&self, request: RequestTemplate) -> Result<HttpResponse, HttpError> {
        let request = request.into_http_request(self.transport_security)?;
        self.send(request).await
    }
}

/// Map buffer errors to `HttpError`.
///
/// The buffer returns the inner service error boxed, or a closed error when
/// its worker is gone.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Reserve a buffer slot without waiting; a full buffer yields `Overloaded`.
///
/// # Errors
/// `Overloaded` when no slot is free, `ServiceClosed` when the worker is gone.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}
