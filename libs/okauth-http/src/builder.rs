use crate::client::{BufferedService, HttpClient};
use crate::config::{HttpClientConfig, RetryConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::{RetryLayer, UserAgentLayer};
use crate::pool::ConnectionLimiter;
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::{Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Type-erased service below the retry layer.
pub type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

/// Builder for [`HttpClient`].
///
/// Stack, outer to inner:
/// `Buffer -> Retry -> Timeout -> UserAgent -> Decompression -> hyper pool`.
/// The connection limiter sits in front of the buffer and is held until the
/// body has been read.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Per-attempt timeout for the response head; each retry gets a fresh
    /// budget. The body read gets one more budget of the same length.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.config.max_concurrent_requests = max;
        self
    }

    #[must_use]
    pub fn max_concurrent_requests_per_route(mut self, max: Option<usize>) -> Self {
        self.config.max_concurrent_requests_per_route = max;
        self
    }

    #[must_use]
    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.config.max_idle_connections = max;
        self
    }

    /// `None` keeps idle connections until the server closes them
    #[must_use]
    pub fn max_idle_time(mut self, idle: Option<Duration>) -> Self {
        self.config.max_idle_time = idle;
        self
    }

    #[must_use]
    pub fn keep_alive_timeout(mut self, keep_alive: Option<Duration>) -> Self {
        self.config.keep_alive_timeout = keep_alive;
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Use `TransportSecurity::AllowInsecureHttp` only with mock servers.
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain `http://` URLs.
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature, so release builds cannot enable it by accident.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "okauth_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Build the pooled client.
    ///
    /// Must run inside a Tokio runtime (the request buffer spawns a worker).
    ///
    /// # Errors
    /// `Tls` when root certificates cannot be loaded, `InvalidProxy` for a
    /// malformed proxy setting, `InvalidHeaderValue` for a bad user agent.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let connector = build_connector(&self.config)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.max_idle_connections)
            .pool_idle_timeout(self.config.max_idle_time);
        let hyper_client = client_builder.build::<_, Full<Bytes>>(connector);

        let base = ServiceBuilder::new()
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(map_decompression_response)
            .map_err(HttpError::from)
            .boxed_clone();

        self.build_with_service(base)
    }

    /// Build around a caller-supplied base service instead of the hyper pool.
    ///
    /// Timeout, user agent, retry and connection limits still apply. Lets
    /// tests drive the full stack without sockets.
    ///
    /// # Errors
    /// `InvalidHeaderValue` for a bad user agent.
    pub fn build_with_service(self, base: InnerService) -> Result<HttpClient, HttpError> {
        let timeout = self.config.read_timeout;
        let ua_layer = UserAgentLayer::try_new(&self.config.user_agent)?;

        let mut service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(ua_layer)
            .service(base)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
            .boxed_clone();

        if let Some(retry) = self.config.retry {
            service = ServiceBuilder::new()
                .layer(RetryLayer::new(retry))
                .service(service)
                .boxed_clone();
        }

        // the limiter admits at most max_concurrent_requests callers, so a
        // buffer at least that large never reports Overloaded
        let capacity = self
            .config
            .buffer_capacity
            .max(self.config.max_concurrent_requests)
            .max(1);
        let buffered: BufferedService = Buffer::new(service, capacity);

        Ok(HttpClient {
            service: buffered,
            limiter: ConnectionLimiter::new(
                self.config.max_concurrent_requests,
                self.config.max_concurrent_requests_per_route,
            ),
            max_body_size: self.config.max_body_size,
            read_timeout: timeout,
            transport_security: self.config.transport,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map tower errors to `HttpError`, keeping typed errors from inner services
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// TCP connector, optionally tunnelling through an HTTP proxy with CONNECT.
#[derive(Clone)]
struct BaseConnector {
    http: HttpConnector,
    proxy: Option<Uri>,
}

impl Service<Uri> for BaseConnector {
    type Response = TokioIo<TcpStream>;
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        match &self.proxy {
            Some(proxy) => {
                let tunnel = Tunnel::new(proxy.clone(), self.http.clone());
                Box::pin(async move { tunnel.oneshot(dst).await.map_err(Into::into) })
            }
            None => {
                let connecting = self.http.call(dst);
                Box::pin(async move { connecting.await.map_err(Into::into) })
            }
        }
    }
}

fn build_connector(config: &HttpClientConfig) -> Result<HttpsConnector<BaseConnector>, HttpError> {
    let mut http = HttpConnector::new();
    // HttpsConnector hands https:// destinations to this connector
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(config.connect_timeout));
    http.set_keepalive(config.keep_alive_timeout);

    let proxy = config.proxy.as_deref().map(parse_proxy).transpose()?;
    if let Some(proxy) = &proxy {
        tracing::debug!(proxy = %proxy, "routing outbound connections through proxy");
    }

    build_https_connector(
        BaseConnector { http, proxy },
        config.tls_roots,
        config.transport,
    )
}

/// Accepts `host:port` or `http://host[:port]`
fn parse_proxy(raw: &str) -> Result<Uri, HttpError> {
    let invalid = |reason: &str| HttpError::InvalidProxy {
        proxy: raw.to_owned(),
        reason: reason.to_owned(),
    };

    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };
    let uri: Uri = candidate
        .parse()
        .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;

    if uri.scheme_str() != Some("http") {
        return Err(invalid("only http:// proxies are supported"));
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing proxy host"));
    }
    Ok(uri)
}

fn build_https_connector(
    base: BaseConnector,
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<BaseConnector>, HttpError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls::os_roots_config()?)
        }
    };

    let builder = if allow_http {
        builder.https_or_http()
    } else {
        builder.https_only()
    };
    Ok(builder.enable_all_versions().wrap_connector(base))
}
