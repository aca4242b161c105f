//! An embeddable HTTP/1.0 and HTTP/1.1 engine on tokio.
//!
//! The crate parses raw byte streams into request/response exchanges, frames bodies with
//! `Content-Length` or chunked transfer coding, and serves connections concurrently with a
//! bounded number of workers and a two-phase shutdown.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use http::StatusCode;
//! use loom_http::connection::Exchange;
//! use loom_http::handler::{Handler, HandlerError};
//! use loom_http::server::Server;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
//!         let body = exchange.read_to_end(64 * 1024).await?;
//!         tracing::info!(len = body.len(), path = exchange.path(), "received request");
//!         exchange.respond(StatusCode::OK, "text/plain", "Hello World!\r\n").await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().address("127.0.0.1:8080".parse()?).handler(Hello).build()?.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: request head decoding, response head encoding, chunked and length body codecs
//! - [`stream`]: the buffered framing-aware reader and writer of a connection
//! - [`connection`]: the [`Exchange`](connection::Exchange) state machine and the connection loop
//! - [`handler`]: the [`Handler`](handler::Handler) and [`ErrorHandler`](handler::ErrorHandler) traits
//! - [`server`]: acceptor, worker pool, active connection registry and shutdown
//! - [`protocol`]: shared protocol types and the error types
//! - [`date`]: the shared `Date` header service
//!
//! # Limitations
//!
//! - HTTP/1.x only, no pipelining
//! - No TLS (use a reverse proxy for HTTPS)
//! - Default limits: 8KB of request head, 64 header fields

pub mod codec;
pub mod connection;
pub mod date;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod stream;

mod utils;
pub(crate) use utils::ensure;
