#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for the okauth `OAuth2` client.
//!
//! - [`RequestTemplate`]: method, URL, headers and parameters of one call,
//!   cloned and extended per request by the OAuth kernel
//! - [`Transport`]: the seam the kernel talks to; [`HttpClient`] is the
//!   pooled hyper implementation
//! - bounded concurrency via [`ConnectionLimiter`] (callers wait for a lease)
//! - per-attempt read timeout, retry with exponential backoff, browser-like
//!   default User-Agent, optional CONNECT proxy
//! - transparent gzip/brotli/deflate decompression with the body limit
//!   applied to decompressed bytes
//!
//! ```ignore
//! use okauth_http::{HttpClient, RequestTemplate, Transport};
//!
//! let client = HttpClient::builder()
//!     .max_concurrent_requests(32)
//!     .build()?;
//!
//! let mut req = RequestTemplate::post("https://gitee.com/oauth/token")?;
//! req.add_param("grant_type", "authorization_code");
//! let resp = client.execute(req).await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod layers;
mod pool;
mod request;
mod response;
mod tls;
mod transport;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{
    DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT, DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig,
    RetryConfig, RetryTrigger, TlsRootConfig, TransportSecurity, is_idempotent_method,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{RetryLayer, RetryService, UserAgentLayer, UserAgentService, calculate_backoff};
pub use pool::{ConnectionLimiter, Lease};
pub use request::RequestTemplate;
pub use response::{HttpResponse, ResponseBody, parse_retry_after, read_body_limited};
pub use transport::Transport;
