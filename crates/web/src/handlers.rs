//! Small building-block handlers.

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::StatusCode;
use loom_http::connection::Exchange;
use loom_http::handler::{Handler, HandlerError};
use tracing::debug;

/// Answers `404 Not Found` with a short plain text body.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

#[async_trait]
impl Handler for NotFoundHandler {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        debug!(path = exchange.path(), "not found");
        exchange.respond(StatusCode::NOT_FOUND, mime::TEXT_PLAIN_UTF_8.as_ref(), "Not Found\n").await?;
        Ok(())
    }
}

/// Answers with a fixed status and its reason phrase as body.
#[derive(Debug, Clone, Copy)]
pub struct StatusHandler {
    status: StatusCode,
}

impl StatusHandler {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let reason = self.status.canonical_reason().unwrap_or_default();
        exchange.respond(self.status, mime::TEXT_PLAIN_UTF_8.as_ref(), format!("{reason}\n")).await?;
        Ok(())
    }
}

/// Re-dispatches the exchange to the server's root handler with another target.
#[derive(Debug, Clone)]
pub struct ForwardHandler {
    target: String,
}

impl ForwardHandler {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

#[async_trait]
impl Handler for ForwardHandler {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        exchange.forward(&self.target).await
    }
}

/// A handler backed by a closure returning a boxed future.
pub struct FnHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wraps a closure as a [`Handler`].
///
/// ```
/// use http::StatusCode;
/// use loom_http::handler::HandlerError;
/// use loom_web::handler_fn;
///
/// let hello = handler_fn(|exchange| {
///     Box::pin(async move {
///         exchange.respond(StatusCode::OK, "text/plain", "hello").await?;
///         Ok::<_, HandlerError>(())
///     })
/// });
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        (self.f)(exchange).await
    }
}
