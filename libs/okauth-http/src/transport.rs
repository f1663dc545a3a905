use crate::error::HttpError;
use crate::request::RequestTemplate;
use crate::response::HttpResponse;
use async_trait::async_trait;
use std::sync::Arc;

/// Something that can execute a [`RequestTemplate`].
///
/// [`HttpClient`](crate::HttpClient) is the pooled implementation. Hosts swap
/// in their own (an in-process stub, an instrumented client) by handing an
/// `Arc<dyn Transport>` to the OAuth client.
///
/// Non-2xx statuses are returned as `Ok`; classifying them is up to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the fully buffered response.
    ///
    /// # Errors
    /// Any [`HttpError`] raised before a complete response was read.
    async fn execute(&self, request: RequestTemplate) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: RequestTemplate) -> Result<HttpResponse, HttpError> {
        (**self).execute(request).await
    }
}
