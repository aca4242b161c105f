//! WebDAV class 1 and 2 serving for `loom-http`.
//!
//! [`DavHandler`] answers `OPTIONS`, `GET`, `HEAD`, `PUT`, `DELETE`, `MKCOL`, `COPY`, `MOVE`,
//! `PROPFIND`, `PROPPATCH`, `LOCK` and `UNLOCK` against a [`ResourceAdapter`], which stores
//! content, dead properties and locks. [`FileHandler`] is the read-only subset.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use loom_dav::{DavConfig, DavHandler, FsResourceAdapter, PlainListing};
//! use loom_http::server::Server;
//! use loom_web::{PathPattern, Router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(FsResourceAdapter::new("/srv/dav"));
//!     let dav = DavHandler::new(adapter, DavConfig::default().with_listing(PlainListing));
//!     let router = Router::builder().route(PathPattern::prefix("/dav"), dav).build();
//!
//!     let server = Server::builder().address("127.0.0.1:8080".parse()?).handler(router).build()?.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`handler`]: the handlers and their configuration
//! - [`adapter`]: the storage trait with in-memory and file system implementations
//! - [`lock`]: lock tokens, scopes, timeouts and the lock table
//! - [`condition`]: the `If` header
//! - [`range`]: `Range` and `Content-Range` handling, multipart byte ranges
//! - [`xml`]: request body parsing and multi-status responses
//! - [`path`], [`headers`]: resource paths, hrefs and the other WebDAV headers

pub mod adapter;
pub mod condition;
pub mod error;
pub mod handler;
pub mod headers;
pub mod listing;
pub mod lock;
pub mod path;
pub mod range;
pub mod xml;

pub use adapter::{FsResourceAdapter, MemoryResourceAdapter, Metadata, ResourceAdapter};
pub use error::DavError;
pub use handler::{DavConfig, DavHandler, FileHandler};
pub use listing::{ListingEntry, ListingRenderer, PlainListing};
pub use lock::{LockError, LockManager, LockPolicy, LockTimeout, MemoryLockManager};
