use thiserror::Error;

/// Why a template URL was rejected. Stable, unlike the `reason` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    ParseError,
    /// No host, e.g. `https:///token`
    MissingAuthority,
    /// Relative URL such as `/oauth/token`
    MissingScheme,
}

/// Transport-level failure of a single exchange
///
/// Everything the transport can report: request construction, connection,
/// TLS, timeouts and body limits. HTTP status codes are not errors at this
/// layer; callers inspect [`HttpResponse::status`](crate::HttpResponse::status).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("cannot assemble request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request templates only carry the standard verbs
    #[error("method {0} is not supported by request templates")]
    UnsupportedMethod(String),

    /// One attempt exceeded the read timeout; retries get a fresh budget
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// Connect, I/O or protocol failure
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Measured on the decompressed body
    #[error("response body of {actual} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize, actual: usize },

    #[error("cannot encode form parameters: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Proxy setting could not be turned into a URI
    #[error("proxy '{proxy}' rejected: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    /// The request buffer has no free slot
    #[error("request buffer is full")]
    Overloaded,

    /// The buffer worker or the lease limiter is gone
    #[error("http client is shut down")]
    ServiceClosed,

    /// `reason` is diagnostic text; match on `kind`
    #[error("cannot use URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Scheme not permitted by the configured [`TransportSecurity`](crate::TransportSecurity)
    #[error("scheme '{scheme}' refused: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// True for failures that happened before any byte left the process
    #[must_use]
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::RequestBuild(_)
                | Self::InvalidHeaderName(_)
                | Self::InvalidHeaderValue(_)
                | Self::UnsupportedMethod(_)
                | Self::FormEncode(_)
                | Self::InvalidUri { .. }
                | Self::InvalidScheme { .. }
        )
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
