use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT_RANGES, ALLOW, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::{HeaderValue, Method, StatusCode};
use loom_http::connection::Exchange;
use loom_http::handler::{Handler, HandlerError};
use mime::Mime;
use tracing::trace;

use super::{DavConfig, DavRequest, conclude, header_value, respond_status};
use crate::adapter::{Metadata, ResourceAdapter};
use crate::error::DavError;
use crate::listing::ListingEntry;
use crate::path;
use crate::range::{ContentRange, MultipartRanges, RangeError, Ranges};

const ALLOWED: &str = "OPTIONS, GET, HEAD";

/// Guesses the media type from the file extension.
pub(crate) fn content_type_for(path: &str) -> Mime {
    let extension = path::name(path).rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "txt" => mime::TEXT_PLAIN_UTF_8,
        "css" => mime::TEXT_CSS_UTF_8,
        "js" => mime::APPLICATION_JAVASCRIPT_UTF_8,
        "json" => mime::APPLICATION_JSON,
        "xml" => mime::TEXT_XML,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "svg" => mime::IMAGE_SVG,
        "pdf" => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn etag_matches(header: &str, etag: &str) -> bool {
    let strip = |tag: &str| tag.trim().trim_start_matches("W/").to_owned();
    header.split(',').any(|candidate| candidate.trim() == "*" || strip(candidate) == strip(etag))
}

/// Serves resource content: `GET` and `HEAD` with entity tags and byte ranges, and
/// `OPTIONS`.
#[derive(Debug, Clone)]
pub struct FileHandler {
    adapter: Arc<dyn ResourceAdapter>,
    config: Arc<DavConfig>,
}

impl FileHandler {
    pub fn new(adapter: Arc<dyn ResourceAdapter>, config: DavConfig) -> Self {
        Self { adapter, config: Arc::new(config) }
    }

    pub fn adapter(&self) -> &Arc<dyn ResourceAdapter> {
        &self.adapter
    }

    pub fn config(&self) -> &DavConfig {
        &self.config
    }

    pub(crate) async fn get(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let meta = self.adapter.metadata(&request.path).await?.ok_or(DavError::NotFound)?;
        if meta.is_collection {
            return self.list(exchange, request).await;
        }

        exchange.set_header(ETAG, header_value(&meta.etag)?)?;
        exchange.set_header(LAST_MODIFIED, header_value(&httpdate::fmt_http_date(meta.modified))?)?;
        exchange.set_header(ACCEPT_RANGES, HeaderValue::from_static("bytes"))?;

        if exchange.header("If-None-Match").is_some_and(|header| etag_matches(header, &meta.etag)) {
            exchange.set_status(StatusCode::NOT_MODIFIED)?;
            return Ok(());
        }

        let content_type = content_type_for(&request.path);
        let ranges = match exchange.header("Range").map(Ranges::parse_header) {
            Some(Ok(ranges)) => ranges.resolve(meta.length).map(Some),
            // a malformed Range header is ignored
            Some(Err(_)) | None => Ok(None),
        };

        match ranges {
            Ok(None) => {
                exchange.set_header(CONTENT_TYPE, header_value(content_type.as_ref())?)?;
                exchange.set_content_length(meta.length)?;
                self.send(exchange, &request.path, 0, meta.length).await
            }
            Ok(Some(ranges)) if ranges.len() == 1 => {
                let (start, end) = ranges[0];
                let range = ContentRange { start, end, total: Some(meta.length) };
                trace!(%range, "serving a single range");
                exchange.set_status(StatusCode::PARTIAL_CONTENT)?;
                exchange.set_header(CONTENT_TYPE, header_value(content_type.as_ref())?)?;
                exchange.set_header(CONTENT_RANGE, header_value(&range.to_string())?)?;
                exchange.set_content_length(range.byte_count())?;
                self.send(exchange, &request.path, start, range.byte_count()).await
            }
            Ok(Some(ranges)) => self.send_multipart(exchange, &request.path, &meta, content_type, ranges).await,
            Err(RangeError::Unsatisfiable) => {
                exchange.set_header(CONTENT_RANGE, header_value(&ContentRange::unsatisfied(meta.length))?)?;
                respond_status(exchange, StatusCode::RANGE_NOT_SATISFIABLE).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send_multipart(
        &self,
        exchange: &mut Exchange,
        path: &str,
        meta: &Metadata,
        content_type: Mime,
        ranges: Vec<(u64, u64)>,
    ) -> Result<(), DavError> {
        let multipart = MultipartRanges::new(content_type.as_ref(), meta.length, ranges);
        trace!(parts = multipart.ranges().len(), "serving multiple ranges");
        exchange.set_status(StatusCode::PARTIAL_CONTENT)?;
        exchange.set_header(CONTENT_TYPE, header_value(&multipart.content_type())?)?;
        exchange.set_content_length(multipart.content_length())?;

        for (index, &(start, end)) in multipart.ranges().iter().enumerate() {
            exchange.write(multipart.part_head(index).as_bytes()).await?;
            self.send(exchange, path, start, end - start + 1).await?;
        }
        exchange.write(multipart.tail().as_bytes()).await?;
        Ok(())
    }

    /// Streams `len` bytes of `path` from `offset`.
    async fn send(&self, exchange: &mut Exchange, path: &str, mut offset: u64, len: u64) -> Result<(), DavError> {
        if exchange.method() == Method::HEAD {
            return Ok(());
        }

        let end = offset + len;
        while offset < end {
            let want = usize::try_from(end - offset).unwrap_or(usize::MAX).min(self.config.chunk_size);
            let chunk = self.adapter.read(path, offset, want).await?;
            if chunk.is_empty() {
                return Err(DavError::conflict(format!("{path} shrank while being read")));
            }
            exchange.write(&chunk).await?;
            offset += chunk.len() as u64;
        }
        Ok(())
    }

    async fn list(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let Some(renderer) = self.config.listing.as_ref() else {
            return Err(DavError::forbidden("collection listing is disabled"));
        };

        let mut entries = Vec::new();
        for child in self.adapter.children(&request.path).await? {
            let Some(meta) = self.adapter.metadata(&child).await? else {
                continue;
            };
            entries.push(ListingEntry {
                name: path::name(&child).to_owned(),
                href: request.href(&child, meta.is_collection),
                is_collection: meta.is_collection,
                length: meta.length,
                modified: meta.modified,
            });
        }

        let body = renderer.render(&request.href(&request.path, true), &entries);
        exchange.respond(StatusCode::OK, renderer.content_type(), body).await?;
        Ok(())
    }

    pub(crate) fn options(&self, exchange: &mut Exchange, allow: &str, dav: bool) -> Result<(), DavError> {
        exchange.set_header(ALLOW, header_value(allow)?)?;
        if dav {
            exchange.set_header(http::HeaderName::from_static("dav"), HeaderValue::from_static("1, 2"))?;
            exchange.set_header(http::HeaderName::from_static("ms-author-via"), HeaderValue::from_static("DAV"))?;
        }
        exchange.set_header(CONTENT_LENGTH, HeaderValue::from(0))?;
        exchange.set_status(StatusCode::OK)?;
        Ok(())
    }

    pub(crate) async fn not_allowed(exchange: &mut Exchange, allow: &str) -> Result<(), DavError> {
        exchange.set_header(ALLOW, header_value(allow)?)?;
        respond_status(exchange, StatusCode::METHOD_NOT_ALLOWED).await
    }

    async fn dispatch(&self, exchange: &mut Exchange) -> Result<(), DavError> {
        let request = DavRequest::from_exchange(exchange)?;
        match exchange.method().clone() {
            Method::GET | Method::HEAD => self.get(exchange, &request).await,
            Method::OPTIONS => self.options(exchange, ALLOWED, false),
            _ => Self::not_allowed(exchange, ALLOWED).await,
        }
    }
}

#[async_trait]
impl Handler for FileHandler {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let result = self.dispatch(exchange).await;
        conclude(exchange, result).await
    }
}
