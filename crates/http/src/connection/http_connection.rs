use std::sync::Arc;
use std::time::Duration;

use http::header::CONNECTION;
use http::HeaderValue;
use tracing::{debug, error, info, trace};

use super::exchange::{Exchange, ExchangeConfig};
use super::transport::Connection;
use crate::date::DateService;
use crate::handler::{DefaultErrorHandler, ErrorHandler, Handler, HandlerError};
use crate::protocol::{HttpError, ParseError};

/// Runs the exchange loop of one connection.
///
/// Requests are answered strictly one after the other. After each response the exchange decides
/// whether the connection stays open; an idle timeout bounds the wait for the next request.
pub struct HttpConnection {
    exchange: Exchange,
    idle_timeout: Option<Duration>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection").field("exchange", &self.exchange).field("idle_timeout", &self.idle_timeout).finish_non_exhaustive()
    }
}

impl HttpConnection {
    pub fn new(connection: Connection, config: ExchangeConfig) -> Self {
        Self { exchange: Exchange::new(connection, config), idle_timeout: None, error_handler: Arc::new(DefaultErrorHandler) }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    #[must_use]
    pub fn with_date_service(mut self, date: Arc<DateService>) -> Self {
        self.exchange.set_date_service(date);
        self
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Serves requests until the peer goes away, a response can't be followed by another one,
    /// or the transport fails. The transport is shut down on every exit path.
    pub async fn process(mut self, handler: Arc<dyn Handler>) -> Result<(), HttpError> {
        self.exchange.set_root(Arc::clone(&handler));
        let result = self.serve(handler.as_ref()).await;
        self.exchange.close().await;
        result
    }

    async fn next_request(&mut self) -> Result<bool, ParseError> {
        match self.idle_timeout {
            Some(idle_timeout) => tokio::time::timeout(idle_timeout, self.exchange.read_request()).await.unwrap_or(Err(ParseError::IdleTimeout)),
            None => self.exchange.read_request().await,
        }
    }

    async fn serve(&mut self, handler: &dyn Handler) -> Result<(), HttpError> {
        loop {
            match self.next_request().await {
                Ok(true) => {}
                Ok(false) => {
                    trace!("peer closed the connection");
                    return Ok(());
                }
                Err(e) if e.is_transport() => {
                    debug!(cause = %e, "can't receive next request");
                    return Err(e.into());
                }
                Err(e) => {
                    info!(cause = %e, "malformed request, answering {}", e.status());
                    self.reply_framing_error(&e).await;
                    return Err(e.into());
                }
            }

            debug!(method = %self.exchange.method(), uri = self.exchange.target(), "dispatching request");
            if let Err(e) = self.exchange.dispatch(handler).await {
                if let Some(framing) = framing_error(&e) {
                    info!(cause = %framing, "malformed request body, answering {}", framing.status());
                    self.reply_framing_error(framing).await;
                    return Ok(());
                }
                error!(cause = %e, method = %self.exchange.method(), path = self.exchange.path(), "handler failed");
                if self.exchange.is_committed() || self.exchange.is_io_failed() {
                    debug!("response already under way, abandoning the connection");
                    return Ok(());
                }
                if let Err(e) = self.error_handler.handle_error(&mut self.exchange, &e).await {
                    error!(cause = %e, "error handler failed");
                    return Err(e);
                }
            }

            self.exchange.finish().await?;
            if !self.exchange.is_persistent() {
                trace!("response is not followed by another request");
                return Ok(());
            }
        }
    }

    async fn reply_framing_error(&mut self, e: &ParseError) {
        if self.exchange.is_committed() {
            return;
        }
        self.exchange.close_after_response();
        let status = e.status();
        let reply = async {
            self.exchange.reset_response()?;
            self.exchange.set_header(CONNECTION, HeaderValue::from_static("close"))?;
            self.exchange.respond(status, "text/plain; charset=utf-8", format!("{status}\n")).await?;
            self.exchange.finish().await
        };
        if let Err(e) = reply.await {
            debug!(cause = %e, "failed to answer a malformed request");
        }
    }
}

/// The request framing error behind a handler failure, if that is what made it fail.
fn framing_error(e: &HandlerError) -> Option<&ParseError> {
    let parse_error = match e.downcast_ref::<HttpError>() {
        Some(HttpError::RequestError { source }) => source,
        Some(HttpError::ResponseError { .. }) => return None,
        None => e.downcast_ref::<ParseError>()?,
    };
    (!parse_error.is_transport()).then_some(parse_error)
}
