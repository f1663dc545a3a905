use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent.
///
/// Several providers answer 403 to clients that do not look like a browser,
/// so the default is a desktop Chrome string rather than a crate identifier.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.61 Safari/537.36";

/// Default drain limit for response bodies before a status-triggered retry (64 KiB)
pub const DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT: usize = 64 * 1024;

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Transport-level errors (connection refused, DNS failure, reset, etc.)
    TransportError,
    /// Attempt exceeded the read timeout
    Timeout,
    /// Specific HTTP status code
    Status(u16),
    /// Error that is never retryable (e.g. invalid URL, `ServiceClosed`)
    NonRetryable,
}

impl RetryTrigger {
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);
    pub const BAD_GATEWAY: Self = Self::Status(502);
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);
    pub const GATEWAY_TIMEOUT: Self = Self::Status(504);
}

/// Check if HTTP method is idempotent per RFC 9110.
#[must_use]
pub fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET
            | http::Method::HEAD
            | http::Method::PUT
            | http::Method::DELETE
            | http::Method::OPTIONS
            | http::Method::TRACE
    )
}

/// Exponential backoff between retry attempts
///
/// Delay is `min(initial * multiplier^attempt, max)`, plus 0-25% jitter when enabled.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    /// Fixed-ish backoff for tests: 1ms initial, 10ms max, no jitter
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Retry policy for failed attempts
///
/// A failed attempt (transport error or timeout) is retried up to
/// `max_retries` times. Retries apply to every HTTP method unless
/// `idempotent_only` is set: token exchanges are POSTs, and a retried POST
/// may submit the same authorization code twice.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt; total attempts = 1 + `max_retries`
    pub max_retries: usize,

    pub backoff: ExponentialBackoff,

    /// Conditions that are retried. Default: transport errors and timeouts.
    pub triggers: HashSet<RetryTrigger>,

    /// Only retry idempotent methods (GET, HEAD, PUT, DELETE, OPTIONS, TRACE).
    /// Default: `false`.
    pub idempotent_only: bool,

    /// Ignore `Retry-After` on status-triggered retries and always use backoff.
    /// An honored `Retry-After` is capped at `backoff.max`.
    pub ignore_retry_after: bool,

    /// Maximum bytes drained from a response body before a status-triggered retry
    pub retry_response_drain_limit: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: ExponentialBackoff::default(),
            triggers: HashSet::from([RetryTrigger::TransportError, RetryTrigger::Timeout]),
            idempotent_only: false,
            ignore_retry_after: false,
            retry_response_drain_limit: DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
        }
    }
}

impl RetryConfig {
    /// Default policy with the given retry count (`retryTimes` in configuration files)
    #[must_use]
    pub fn with_retry_times(retry_times: usize) -> Self {
        Self {
            max_retries: retry_times,
            ..Default::default()
        }
    }

    /// Also retry on the given HTTP status code
    #[must_use]
    pub fn retry_on_status(mut self, status: u16) -> Self {
        self.triggers.insert(RetryTrigger::Status(status));
        self
    }

    /// Check if the given trigger should cause a retry for the given HTTP method
    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger, method: &http::Method) -> bool {
        if trigger == RetryTrigger::NonRetryable || !self.triggers.contains(&trigger) {
            return false;
        }
        !self.idempotent_only || is_idempotent_method(method)
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// OS native root certificate store
    Native,
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow plain HTTP (mock servers, local development)
    AllowInsecureHttp,
}

/// Configuration of the pooled HTTP transport
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// TCP connect timeout (default: 5 seconds)
    pub connect_timeout: Duration,

    /// Per-attempt timeout from sending the request to receiving the response
    /// head (default: 10 seconds). Each retry gets its own budget.
    pub read_timeout: Duration,

    /// Ceiling on concurrently leased connections across all hosts (default: 64).
    /// Callers beyond the ceiling wait for a lease.
    pub max_concurrent_requests: usize,

    /// Optional ceiling per destination host
    pub max_concurrent_requests_per_route: Option<usize>,

    /// Idle connections kept per host (default: 8)
    pub max_idle_connections: usize,

    /// Idle connections older than this are evicted (default: 90 seconds)
    pub max_idle_time: Option<Duration>,

    /// TCP keep-alive override for pooled connections
    pub keep_alive_timeout: Option<Duration>,

    pub retry: Option<RetryConfig>,

    /// Outbound HTTP proxy (`host:port` or `http://host:port`), reached via CONNECT
    pub proxy: Option<String>,

    pub user_agent: String,

    /// Maximum buffered response body size in bytes (default: 1 MB)
    pub max_body_size: usize,

    pub transport: TransportSecurity,

    pub tls_roots: TlsRootConfig,

    /// Capacity of the internal request buffer (default: 256).
    /// Raised to `max_concurrent_requests` at build time when smaller.
    pub buffer_capacity: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            max_concurrent_requests: 64,
            max_concurrent_requests_per_route: None,
            max_idle_connections: 8,
            max_idle_time: Some(Duration::from_secs(90)),
            keep_alive_timeout: None,
            retry: Some(RetryConfig::default()),
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 256,
        }
    }
}

impl HttpClientConfig {
    /// Configuration for mock servers: plain HTTP, no retry, short timeouts.
    ///
    /// **WARNING**: allows unencrypted connections. Never use in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            retry: None,
            transport: TransportSecurity::AllowInsecureHttp,
            max_idle_time: Some(Duration::from_secs(10)),
            max_idle_connections: 4,
            ..Default::default()
        }
    }

    /// Token endpoints: retries limited to idempotent methods so an
    /// authorization code is never submitted twice, small body limit.
    #[must_use]
    pub fn token_endpoint() -> Self {
        Self {
            retry: Some(RetryConfig {
                idempotent_only: true,
                ..RetryConfig::default()
            }),
            max_body_size: 256 * 1024,
            ..Default::default()
        }
    }
}
