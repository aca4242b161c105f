//! The request handlers.
//!
//! [`FileHandler`] serves `GET`, `HEAD` and `OPTIONS` from a [`ResourceAdapter`].
//! [`DavHandler`] wraps a `FileHandler` and adds the WebDAV methods on top, dispatching them
//! through a table built once at construction.
//!
//! Both resolve resources from the exchange's resource path, so they can be mounted below any
//! prefix of a [`Router`](loom_web::Router); hrefs in responses carry that prefix.

mod copymove;
mod dav;
mod file;
mod locking;
mod props;
mod write;

use std::sync::Arc;

use http::header::CONTENT_LENGTH;
use http::{HeaderValue, StatusCode};
use loom_http::connection::Exchange;
use loom_http::handler::HandlerError;
use loom_http::protocol::SendError;
use tracing::{debug, warn};

pub use dav::DavHandler;
pub use file::FileHandler;

use crate::condition::Conditions;
use crate::error::DavError;
use crate::listing::ListingRenderer;
use crate::lock::LockPolicy;
use crate::path;

/// Chunk size of content transfers
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Limit of XML request bodies
pub const DEFAULT_MAX_XML_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct DavConfig {
    pub lock_policy: LockPolicy,
    /// whether `PROPFIND` with `Depth: infinity` is served or refused with `403`
    pub allow_infinite_propfind: bool,
    /// renders `GET` on collections; refused with `403` when unset
    pub listing: Option<Arc<dyn ListingRenderer>>,
    pub chunk_size: usize,
    pub max_xml_bytes: usize,
}

impl std::fmt::Debug for DavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavConfig")
            .field("lock_policy", &self.lock_policy)
            .field("allow_infinite_propfind", &self.allow_infinite_propfind)
            .field("listing", &self.listing.is_some())
            .field("chunk_size", &self.chunk_size)
            .field("max_xml_bytes", &self.max_xml_bytes)
            .finish()
    }
}

impl Default for DavConfig {
    fn default() -> Self {
        Self {
            lock_policy: LockPolicy::default(),
            allow_infinite_propfind: true,
            listing: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_xml_bytes: DEFAULT_MAX_XML_BYTES,
        }
    }
}

impl DavConfig {
    #[must_use]
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    #[must_use]
    pub fn with_infinite_propfind(mut self, allow: bool) -> Self {
        self.allow_infinite_propfind = allow;
        self
    }

    #[must_use]
    pub fn with_listing(mut self, renderer: impl ListingRenderer + 'static) -> Self {
        self.listing = Some(Arc::new(renderer));
        self
    }
}

/// The resource a request targets and its parsed `If` header.
#[derive(Debug)]
pub(crate) struct DavRequest {
    pub(crate) path: String,
    /// the prefix the handler is mounted below
    pub(crate) mount: String,
    pub(crate) conditions: Conditions,
}

impl DavRequest {
    pub(crate) fn from_exchange(exchange: &Exchange) -> Result<Self, DavError> {
        let segments = exchange.segments();
        let mount = format!("{}{}", segments.context, segments.component);
        let path = path::normalize(&segments.resource).ok_or_else(|| DavError::forbidden("path leaves the mount"))?;
        let conditions = Conditions::parse(exchange.header("If"), &mount)?;
        Ok(Self { path, mount, conditions })
    }

    pub(crate) fn href(&self, path: &str, collection: bool) -> String {
        path::href(&self.mount, path, collection)
    }
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, DavError> {
    HeaderValue::from_str(value).map_err(|e| DavError::from(SendError::invalid_body(e)))
}

/// Answers with `status` and its reason phrase, or no body at all for `204`.
pub(crate) async fn respond_status(exchange: &mut Exchange, status: StatusCode) -> Result<(), DavError> {
    if status == StatusCode::NO_CONTENT {
        exchange.response_headers_mut()?.remove(CONTENT_LENGTH);
        exchange.set_status(status)?;
        return Ok(());
    }
    let reason = status.canonical_reason().unwrap_or_default();
    exchange.respond(status, mime::TEXT_PLAIN_UTF_8.as_ref(), format!("{reason}\n")).await?;
    Ok(())
}

pub(crate) async fn respond_xml(exchange: &mut Exchange, status: StatusCode, body: Vec<u8>) -> Result<(), DavError> {
    exchange.respond(status, "application/xml; charset=utf-8", body).await?;
    Ok(())
}

/// Turns the outcome of a WebDAV operation into the handler result.
///
/// Operation failures are answered with their status while the response is still open;
/// transport and framing failures go back to the connection.
pub(crate) async fn conclude(exchange: &mut Exchange, result: Result<(), DavError>) -> Result<(), HandlerError> {
    let e = match result {
        Ok(()) => return Ok(()),
        Err(DavError::Http(e)) => return Err(Box::new(e)),
        Err(e) if exchange.is_committed() => return Err(Box::new(e)),
        Err(e) => e,
    };

    let status = e.status();
    if status.is_server_error() {
        warn!(cause = %e, %status, path = exchange.path(), "dav operation failed");
    } else {
        debug!(cause = %e, %status, path = exchange.path(), "dav operation refused");
    }
    exchange.reset_response()?;
    match respond_status(exchange, status).await {
        Ok(()) => Ok(()),
        Err(DavError::Http(e)) => Err(Box::new(e)),
        Err(e) => Err(Box::new(e)),
    }
}
