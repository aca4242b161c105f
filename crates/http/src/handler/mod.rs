//! Request handlers.
//!
//! A [`Handler`] receives the [`Exchange`] after its request head was parsed and answers it by
//! reading the body and writing the response through the exchange. Failures escaping a handler
//! are turned into a response by an [`ErrorHandler`] while the response head is still unsent.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use crate::connection::Exchange;
use crate::protocol::HttpError;

/// Failure escaping a handler
pub type HandlerError = Box<dyn Error + Send + Sync>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        self.as_ref().handle(exchange).await
    }
}

#[async_trait]
impl<H> Handler for Box<H>
where
    H: Handler + ?Sized,
{
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        self.as_ref().handle(exchange).await
    }
}

/// Answers a request whose handler failed before committing the response head.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, exchange: &mut Exchange, error: &HandlerError) -> Result<(), HttpError>;
}

/// Replies `500 Internal Server Error` with a short plain text body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle_error(&self, exchange: &mut Exchange, _error: &HandlerError) -> Result<(), HttpError> {
        exchange.reset_response()?;
        exchange.respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain; charset=utf-8", "Internal Server Error\n").await?;
        Ok(())
    }
}
