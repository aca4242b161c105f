//! The per-connection exchange state machine.
//!
//! One [`Exchange`] lives as long as its connection and is reused for every request sent on
//! it. [`Exchange::read_request`] parses the next request head, handlers then read the body and
//! write the response through the exchange, and [`Exchange::finish`] completes the response and
//! drains whatever request body was left unread. [`Exchange::is_persistent`] decides whether
//! the connection carries another request afterwards.
//!
//! The response head is committed exactly once, either on the first flush of body bytes or
//! when the exchange finishes. Its framing is decided at that moment:
//!
//! 1. statuses without a body (1xx, 204, 304) get `Content-Length: 0`
//! 2. a `Content-Length` set by the handler is used as is
//! 3. a response finished before anything was flushed gets the length of its buffered body
//! 4. HTTP/1.1 responses stream with chunked transfer coding
//! 5. anything else is delimited by closing the connection

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE};
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Version};
use percent_encoding::percent_decode_str;
use tracing::{debug, trace};

use super::transport::{BoxedReader, BoxedWriter, Connection, ConnectionInfo};
use crate::codec::{HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM, parse_request_line, request_payload_size};
use crate::date::DateService;
use crate::handler::{Handler, HandlerError};
use crate::protocol::{HeaderList, HttpError, Params, ParseError, PayloadSize, RequestHead, ResponseHead, SendError};
use crate::stream::{DEFAULT_READ_BUFFER, DEFAULT_WRITE_BUFFER, FramedReader, FramedWriter};

/// Default limit of an `application/x-www-form-urlencoded` body read for parameters
pub const DEFAULT_MAX_FORM_BYTES: usize = 64 * 1024;

/// Buffer sizes and limits of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// cap on the body bytes of a single response
    pub max_output_bytes: Option<u64>,
    pub max_header_bytes: usize,
    pub max_headers: usize,
    pub max_form_bytes: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
            write_buffer_size: DEFAULT_WRITE_BUFFER,
            max_output_bytes: None,
            max_header_bytes: MAX_HEADER_BYTES,
            max_headers: MAX_HEADER_NUM,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeState {
    Idle,
    ParsedRequestLine,
    ParsedHeaders,
    Dispatched,
    HeadersCommitted,
    Complete,
}

/// The decoded request path split in three.
///
/// `context` is the prefix consumed by the matchers that led to the current handler,
/// `component` the prefix matched for the current handler and `resource` the rest. The three
/// always concatenate to the full decoded path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSegments {
    pub context: String,
    pub component: String,
    pub resource: String,
}

impl PathSegments {
    pub fn new(path: &str) -> Self {
        Self { context: String::new(), component: String::new(), resource: path.to_owned() }
    }

    /// Moves the current component into the context and takes the first `len` bytes of the
    /// resource as the new component.
    ///
    /// Returns `None` if `len` is not a char boundary of the resource path.
    pub fn descend(&self, len: usize) -> Option<Self> {
        if !self.resource.is_char_boundary(len) {
            return None;
        }
        let (component, resource) = self.resource.split_at(len);
        Some(Self { context: format!("{}{}", self.context, self.component), component: component.to_owned(), resource: resource.to_owned() })
    }

    pub fn full_path(&self) -> String {
        format!("{}{}{}", self.context, self.component, self.resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    None,
    /// the client waits for `100 Continue` before sending the body
    Pending,
    Handled,
}

fn default_response() -> ResponseHead {
    Response::new(())
}

pub struct Exchange {
    reader: FramedReader<BoxedReader>,
    writer: FramedWriter<BoxedWriter>,
    info: ConnectionInfo,
    config: ExchangeConfig,
    header_decoder: HeaderDecoder,
    date: Option<Arc<DateService>>,
    root: Option<Arc<dyn Handler>>,

    state: ExchangeState,
    request: RequestHead,
    path: String,
    query: Option<String>,
    segments: PathSegments,
    request_size: PayloadSize,
    params: Option<Params>,
    expect: Expectation,

    response: ResponseHead,
    response_size: Option<PayloadSize>,
    chunking: bool,
    attributes: Extensions,

    io_failed: bool,
    force_close: bool,
    closed: bool,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("info", &self.info)
            .field("state", &self.state)
            .field("method", &self.request.method)
            .field("target", &self.request.target)
            .field("status", &self.response.status())
            .field("response_size", &self.response_size)
            .finish_non_exhaustive()
    }
}

impl Exchange {
    pub fn new(connection: Connection, config: ExchangeConfig) -> Self {
        let Connection { reader, writer, info } = connection;
        Self {
            reader: FramedReader::with_capacity(reader, config.read_buffer_size),
            writer: FramedWriter::with_capacity(writer, config.write_buffer_size, config.max_output_bytes),
            info,
            config,
            header_decoder: HeaderDecoder::new(config.max_headers, config.max_header_bytes),
            date: None,
            root: None,
            state: ExchangeState::Idle,
            request: RequestHead::default(),
            path: String::new(),
            query: None,
            segments: PathSegments::default(),
            request_size: PayloadSize::Empty,
            params: None,
            expect: Expectation::None,
            response: default_response(),
            response_size: None,
            chunking: true,
            attributes: Extensions::new(),
            io_failed: false,
            force_close: false,
            closed: false,
        }
    }

    /// Stamps every committed response with the service's `Date`.
    pub fn set_date_service(&mut self, date: Arc<DateService>) {
        self.date = Some(date);
    }

    /// The top level handler [`forward`](Self::forward) re-enters.
    pub fn set_root(&mut self, root: Arc<dyn Handler>) {
        self.root = Some(root);
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Returns every per-request field to its initial state.
    pub fn reset(&mut self) {
        self.state = ExchangeState::Idle;
        self.request = RequestHead::default();
        self.path.clear();
        self.query = None;
        self.segments = PathSegments::default();
        self.request_size = PayloadSize::Empty;
        self.params = None;
        self.expect = Expectation::None;
        self.response = default_response();
        self.response_size = None;
        self.chunking = true;
        self.attributes.clear();
        self.reader.set_payload(PayloadSize::Empty);
        self.writer.reset();
    }

    /// Parses the next request head.
    ///
    /// Returns `Ok(false)` when the peer closed the connection between requests. Empty lines
    /// in front of the request line are skipped.
    pub async fn read_request(&mut self) -> Result<bool, ParseError> {
        self.reset();

        let line = loop {
            match self.reader.read_line(self.config.max_header_bytes).await {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => break line,
                Ok(None) => return Ok(false),
                Err(e) => return Err(self.note_parse_error(e)),
            }
        };

        let (method, target, version) = parse_request_line(&line)?;
        trace!(%method, %target, ?version, "parsed request line");
        self.request.method = method;
        self.request.version = version;
        *self.response.version_mut() = version;
        self.apply_target(&target)?;
        self.request.target = target;
        self.state = ExchangeState::ParsedRequestLine;

        let headers = match self.reader.decode_frame(&mut self.header_decoder).await {
            Ok(Some(headers)) => headers,
            Ok(None) => return Err(ParseError::invalid_header("connection closed before the header block")),
            Err(e) => return Err(self.note_parse_error(e)),
        };
        let size = request_payload_size(&headers)?;
        self.request.headers = headers;
        self.state = ExchangeState::ParsedHeaders;

        self.request_size = size;
        self.reader.set_payload(size);
        if self.request.expects_continue() && !size.is_empty() {
            self.expect = Expectation::Pending;
        }
        Ok(true)
    }

    fn note_parse_error(&mut self, e: ParseError) -> ParseError {
        if e.is_io() {
            self.io_failed = true;
        }
        e
    }

    fn note_send_error<T>(&mut self, result: Result<T, SendError>) -> Result<T, SendError> {
        if let Err(e) = &result
            && e.is_io()
        {
            self.io_failed = true;
        }
        result
    }

    /// Splits a raw target into the decoded path and the query.
    fn apply_target(&mut self, target: &str) -> Result<(), ParseError> {
        let origin = match target.split_once("://") {
            Some((_, rest)) => rest.find('/').map_or("/", |at| &rest[at..]),
            None => target,
        };
        let (path, query) = match origin.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (origin, None),
        };
        let decoded = percent_decode_str(path).decode_utf8().map_err(|_| ParseError::InvalidUri)?;

        self.path = decoded.into_owned();
        self.query = query.map(str::to_owned);
        self.segments = PathSegments::new(&self.path);
        self.params = None;
        Ok(())
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    /// The request target as received.
    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn version(&self) -> Version {
        self.request.version
    }

    /// The percent-decoded request path, without the query.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderList {
        &self.request.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name)
    }

    pub fn segments(&self) -> &PathSegments {
        &self.segments
    }

    /// Replaces the path segments; the router uses this to scope nested dispatch.
    pub fn set_segments(&mut self, segments: PathSegments) {
        self.segments = segments;
    }

    /// The path below the current handler's mount point.
    pub fn resource_path(&self) -> &str {
        &self.segments.resource
    }

    pub fn request_payload_size(&self) -> PayloadSize {
        self.request_size
    }

    pub fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    fn is_form_body(&self) -> bool {
        !self.request_size.is_empty()
            && self
                .request
                .headers
                .get("Content-Type")
                .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
    }

    /// Query and form parameters, parsed on first use.
    ///
    /// An `application/x-www-form-urlencoded` body is read up to the configured form limit and
    /// its pairs follow those of the query.
    pub async fn params(&mut self) -> Result<&Params, HttpError> {
        if self.params.is_none() {
            let mut params = Params::from_query(self.query.as_deref().unwrap_or_default())?;
            if self.is_form_body() {
                let body = self.read_to_end(self.config.max_form_bytes).await?;
                params.extend_from_urlencoded(&body)?;
            }
            self.params = Some(params);
        }
        Ok(self.params.get_or_insert_with(Params::default))
    }

    async fn before_body_read(&mut self) -> Result<(), HttpError> {
        if self.expect == Expectation::Pending && !self.writer.is_head_written() {
            let result = self.writer.write_interim(self.request.version, StatusCode::CONTINUE).await;
            self.note_send_error(result)?;
            debug!("sent 100 continue on first body read");
            self.expect = Expectation::Handled;
        }
        Ok(())
    }

    /// Reads at most `max` request body bytes, `None` at the end of the body.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>, HttpError> {
        self.before_body_read().await?;
        let result = self.reader.read_chunk(max).await;
        Ok(result.map_err(|e| self.note_parse_error(e))?)
    }

    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, HttpError> {
        self.before_body_read().await?;
        let result = self.reader.read(dst).await;
        Ok(result.map_err(|e| self.note_parse_error(e))?)
    }

    pub async fn read_byte(&mut self) -> Result<Option<u8>, HttpError> {
        self.before_body_read().await?;
        let result = self.reader.read_byte().await;
        Ok(result.map_err(|e| self.note_parse_error(e))?)
    }

    /// Reads the rest of the request body, failing with `413` semantics past `limit` bytes.
    pub async fn read_to_end(&mut self, limit: usize) -> Result<Bytes, HttpError> {
        self.before_body_read().await?;
        let result = self.reader.read_to_end(limit).await;
        Ok(result.map_err(|e| self.note_parse_error(e))?)
    }

    pub async fn skip(&mut self, n: u64) -> Result<u64, HttpError> {
        self.before_body_read().await?;
        let result = self.reader.skip(n).await;
        Ok(result.map_err(|e| self.note_parse_error(e))?)
    }

    /// Request body bytes readable without waiting on the peer.
    pub fn available(&mut self) -> Result<usize, ParseError> {
        self.reader.available()
    }

    pub fn mark(&mut self, limit: usize) {
        self.reader.mark(limit);
    }

    pub fn reset_to_mark(&mut self) -> Result<(), ParseError> {
        self.reader.reset()
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn response_headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn is_committed(&self) -> bool {
        self.writer.is_head_written()
    }

    fn ensure_uncommitted(&self) -> Result<(), SendError> {
        if self.is_committed() || self.state == ExchangeState::Complete {
            return Err(SendError::HeadersCommitted);
        }
        Ok(())
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), SendError> {
        self.ensure_uncommitted()?;
        *self.response.status_mut() = status;
        Ok(())
    }

    /// Mutable response headers, available until the head is committed.
    pub fn response_headers_mut(&mut self) -> Result<&mut HeaderMap, SendError> {
        self.ensure_uncommitted()?;
        Ok(self.response.headers_mut())
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), SendError> {
        self.response_headers_mut()?.insert(name, value);
        Ok(())
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), SendError> {
        self.response_headers_mut()?.append(name, value);
        Ok(())
    }

    pub fn set_content_length(&mut self, length: u64) -> Result<(), SendError> {
        self.set_header(CONTENT_LENGTH, HeaderValue::from(length))
    }

    /// Forbids chunked transfer coding for this response.
    pub fn disable_chunking(&mut self) -> Result<(), SendError> {
        self.ensure_uncommitted()?;
        self.chunking = false;
        Ok(())
    }

    /// Discards the status, the headers and any buffered body of an uncommitted response.
    pub fn reset_response(&mut self) -> Result<(), SendError> {
        self.ensure_uncommitted()?;
        self.response = default_response();
        *self.response.version_mut() = self.request.version;
        self.chunking = true;
        self.writer.reset();
        Ok(())
    }

    /// Closes the connection after this exchange whatever the response says.
    pub fn close_after_response(&mut self) {
        self.force_close = true;
    }

    /// Buffers response body bytes, flushing once the buffer is full.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.state == ExchangeState::Complete {
            return Err(SendError::Completed);
        }
        self.writer.buffer(data)?;
        if self.writer.is_full() {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commits the response head if needed and pushes buffered bytes to the peer.
    pub async fn flush(&mut self) -> Result<(), SendError> {
        self.commit_headers(false).await?;
        let result = self.writer.flush().await;
        self.note_send_error(result)
    }

    /// Writes a whole response: status, content type and a body with an exact length.
    pub async fn respond(&mut self, status: StatusCode, content_type: &str, body: impl AsRef<[u8]>) -> Result<(), SendError> {
        let body = body.as_ref();
        self.set_status(status)?;
        self.set_header(CONTENT_TYPE, HeaderValue::from_str(content_type).map_err(SendError::invalid_body)?)?;
        self.set_content_length(body.len() as u64)?;
        self.write(body).await
    }

    fn explicit_length(&self) -> Option<u64> {
        self.response.headers().get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
    }

    fn request_wants_persistence(&self) -> bool {
        let headers = &self.request.headers;
        match self.request.version {
            Version::HTTP_11 => !headers.has_token("Connection", "close"),
            _ => headers.has_token("Connection", "keep-alive"),
        }
    }

    /// Serializes the response head once. `closing` is set when the exchange finishes
    /// without having committed, so the buffered body is all there is.
    async fn commit_headers(&mut self, closing: bool) -> Result<(), SendError> {
        if self.is_committed() {
            return Ok(());
        }

        let mut discard_body = self.request.is_head();
        let status = self.response.status();

        let size = if self.expect == Expectation::Pending && !status.is_success() {
            debug!(%status, "rejecting expectation, the request body will not be read");
            *self.response.status_mut() = StatusCode::EXPECTATION_FAILED;
            self.response.headers_mut().remove(CONTENT_LENGTH);
            self.reader.set_payload(PayloadSize::Empty);
            self.request_size = PayloadSize::Empty;
            self.force_close = true;
            discard_body = true;
            PayloadSize::Empty
        } else {
            if self.expect == Expectation::Pending {
                let result = self.writer.write_interim(self.request.version, StatusCode::CONTINUE).await;
                self.note_send_error(result)?;
                self.expect = Expectation::Handled;
            }

            if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
                discard_body = true;
                PayloadSize::Empty
            } else if let Some(length) = self.explicit_length() {
                PayloadSize::new_length(length)
            } else if closing {
                PayloadSize::new_length(self.writer.buffered_len() as u64)
            } else if self.chunking && self.request.version == Version::HTTP_11 {
                PayloadSize::Chunked
            } else {
                self.force_close = true;
                PayloadSize::Unbounded
            }
        };

        *self.response.version_mut() = self.request.version;

        if let Some(date) = self.date.as_ref().and_then(|date| date.header_value()) {
            self.response.headers_mut().entry(DATE).or_insert(date);
        }

        let persist = !self.force_close
            && self.request_wants_persistence()
            && !self.response.headers().get(CONNECTION).is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"));
        if !persist {
            self.response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        } else if self.request.version == Version::HTTP_10 {
            self.response.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let result = self.writer.write_head(&mut self.response, size, discard_body);
        self.note_send_error(result)?;
        self.response_size = Some(size);
        self.state = ExchangeState::HeadersCommitted;
        trace!(status = %self.response.status(), ?size, "committed response head");
        Ok(())
    }

    /// Marks the exchange dispatched and runs `handler` on it.
    pub async fn dispatch(&mut self, handler: &dyn Handler) -> Result<(), HandlerError> {
        self.state = ExchangeState::Dispatched;
        handler.handle(self).await
    }

    /// Re-enters the root handler with a new target.
    ///
    /// Only the path and the cached parameters are replaced; method, headers and the unread
    /// body stay as they are.
    pub async fn forward(&mut self, target: &str) -> Result<(), HandlerError> {
        let root = self.root.clone().ok_or("no root handler to forward to")?;
        self.apply_target(target)?;
        target.clone_into(&mut self.request.target);
        debug!(to = target, "forwarding request");
        root.handle(self).await
    }

    /// Completes the response and drains the unread request body.
    pub async fn finish(&mut self) -> Result<(), HttpError> {
        if self.state == ExchangeState::Complete {
            return Ok(());
        }

        if !self.is_committed() {
            self.commit_headers(true).await?;
        }
        let result = self.writer.finish().await;
        if let Err(e) = self.note_send_error(result) {
            self.force_close = true;
            return Err(e.into());
        }

        if self.expect == Expectation::Pending || self.force_close {
            // the client never sent the body
            self.force_close = true;
        } else if let Err(e) = self.reader.drain().await {
            self.io_failed = true;
            return Err(e.into());
        }

        self.state = ExchangeState::Complete;
        Ok(())
    }

    /// Returns true if the connection can carry another request.
    pub fn is_persistent(&self) -> bool {
        if self.io_failed || self.force_close || self.closed {
            return false;
        }
        let determinate = self.response_size.is_some_and(|size| size.is_determinate());
        let close_sent = self.response.headers().get(CONNECTION).is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"));
        determinate && !close_sent && self.request_wants_persistence()
    }

    pub fn is_io_failed(&self) -> bool {
        self.io_failed
    }

    /// Shuts the transport down. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            trace!(cause = %e, "shutdown of the transport failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    fn crlf(raw: &str) -> Vec<u8> {
        raw.replace('\n', "\r\n").into_bytes()
    }

    async fn open_with(raw: &[u8], config: ExchangeConfig) -> (Exchange, DuplexStream) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(raw).await.unwrap();
        let exchange = Exchange::new(Connection::from_io(server, ConnectionInfo::default()), config);
        (exchange, client)
    }

    async fn open(raw: &[u8]) -> (Exchange, DuplexStream) {
        open_with(raw, ExchangeConfig::default()).await
    }

    async fn output(mut exchange: Exchange, mut client: DuplexStream) -> String {
        exchange.close().await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn parses_request_head() {
        let raw = crlf(indoc! {r##"
        GET /dav/some%20file.txt?a=1&b=2 HTTP/1.1
        Host: localhost
        X-Token: abc

        "##});
        let (mut exchange, _client) = open(&raw).await;

        assert!(exchange.read_request().await.unwrap());
        assert_eq!(exchange.state(), ExchangeState::ParsedHeaders);
        assert_eq!(exchange.method(), Method::GET);
        assert_eq!(exchange.target(), "/dav/some%20file.txt?a=1&b=2");
        assert_eq!(exchange.path(), "/dav/some file.txt");
        assert_eq!(exchange.query(), Some("a=1&b=2"));
        assert_eq!(exchange.header("x-token"), Some("abc"));
        assert_eq!(exchange.segments().resource, "/dav/some file.txt");
        assert!(exchange.request_payload_size().is_empty());
    }

    #[tokio::test]
    async fn absolute_form_target() {
        let (mut exchange, _client) = open(b"GET http://example.com:8080/a/b?x HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        assert_eq!(exchange.path(), "/a/b");
        assert_eq!(exchange.query(), Some("x"));
    }

    #[tokio::test]
    async fn closed_before_request() {
        let (mut exchange, client) = open(b"").await;
        drop(client);
        assert!(!exchange.read_request().await.unwrap());
    }

    #[tokio::test]
    async fn fixed_length_response_persists() {
        let (mut exchange, client) = open(b"GET / HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::OK, "text/plain", "hello").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(exchange.is_persistent());
        assert_eq!(exchange.state(), ExchangeState::Complete);
        let out = output(exchange, client).await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.contains("content-length: 5\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\nhello"), "{out}");
    }

    #[tokio::test]
    async fn unflushed_body_gets_content_length() {
        let (mut exchange, client) = open(b"GET / HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.write(b"abc").await.unwrap();
        exchange.write(b"def").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.contains("content-length: 6\r\n"), "{out}");
        assert!(!out.contains("transfer-encoding"), "{out}");
    }

    #[tokio::test]
    async fn flushed_body_is_chunked_on_http_11() {
        let (mut exchange, client) = open(b"GET / HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.write(b"abc").await.unwrap();
        exchange.flush().await.unwrap();
        assert!(exchange.set_status(StatusCode::NOT_FOUND).is_err());
        exchange.write(b"de").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.contains("transfer-encoding: chunked\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n"), "{out}");
    }

    #[tokio::test]
    async fn streamed_http_10_response_closes() {
        let (mut exchange, client) = open(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.write(b"abc").await.unwrap();
        exchange.flush().await.unwrap();
        exchange.finish().await.unwrap();

        assert!(!exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.starts_with("HTTP/1.0 200 OK\r\n"), "{out}");
        assert!(out.contains("connection: close\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\nabc"), "{out}");
    }

    #[tokio::test]
    async fn http_10_persistence_needs_keep_alive() {
        let (mut exchange, client) = open(b"GET / HTTP/1.0\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::OK, "text/plain", "x").await.unwrap();
        exchange.finish().await.unwrap();
        assert!(!exchange.is_persistent());
        drop(output(exchange, client).await);

        let (mut exchange, client) = open(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::OK, "text/plain", "x").await.unwrap();
        exchange.finish().await.unwrap();
        assert!(exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.contains("connection: keep-alive\r\n"), "{out}");
    }

    #[tokio::test]
    async fn connection_close_request() {
        let (mut exchange, client) = open(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::OK, "text/plain", "x").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(!exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.contains("connection: close\r\n"), "{out}");
    }

    #[tokio::test]
    async fn bodyless_statuses() {
        let (mut exchange, client) = open(b"DELETE /f HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.set_status(StatusCode::NO_CONTENT).unwrap();
        exchange.write(b"ignored").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"), "{out}");
        assert!(out.ends_with("content-length: 0\r\n\r\n"), "{out}");
    }

    #[tokio::test]
    async fn head_keeps_content_length_without_body() {
        let (mut exchange, client) = open(b"HEAD /f HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::OK, "text/plain", "twelve bytes").await.unwrap();
        exchange.finish().await.unwrap();

        let out = output(exchange, client).await;
        assert!(out.contains("content-length: 12\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\n"), "{out}");
    }

    #[tokio::test]
    async fn unread_body_is_drained() {
        let raw = crlf(indoc! {r##"
        PUT /a HTTP/1.1
        Transfer-Encoding: chunked

        5
        hello
        0

        GET /b HTTP/1.1

        "##});
        let (mut exchange, _client) = open(&raw).await;

        exchange.read_request().await.unwrap();
        assert!(exchange.request_payload_size().is_chunked());
        exchange.respond(StatusCode::OK, "text/plain", "").await.unwrap();
        exchange.finish().await.unwrap();
        assert!(exchange.is_persistent());

        assert!(exchange.read_request().await.unwrap());
        assert_eq!(exchange.path(), "/b");
        assert_eq!(exchange.state(), ExchangeState::ParsedHeaders);
        assert!(!exchange.is_committed());
    }

    #[tokio::test]
    async fn continue_sent_on_first_body_read() {
        let (mut exchange, client) =
            open(b"PUT /f HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\nhello").await;
        exchange.read_request().await.unwrap();
        let body = exchange.read_to_end(64).await.unwrap();
        assert_eq!(&body[..], b"hello");
        exchange.set_status(StatusCode::CREATED).unwrap();
        exchange.finish().await.unwrap();

        assert!(exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\n"), "{out}");
    }

    #[tokio::test]
    async fn continue_sent_at_commit_for_success() {
        let (mut exchange, client) =
            open(b"PUT /f HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\nhello").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::OK, "text/plain", "ok").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "{out}");
    }

    #[tokio::test]
    async fn expectation_failed_without_reading_body() {
        let (mut exchange, client) = open(b"PUT /f HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.respond(StatusCode::FORBIDDEN, "text/plain", "no").await.unwrap();
        exchange.finish().await.unwrap();

        assert!(!exchange.is_persistent());
        let out = output(exchange, client).await;
        assert!(out.starts_with("HTTP/1.1 417 Expectation Failed\r\n"), "{out}");
        assert!(out.contains("connection: close\r\n"), "{out}");
        assert!(out.ends_with("content-length: 0\r\n\r\n") || out.ends_with("connection: close\r\n\r\n"), "{out}");
    }

    #[tokio::test]
    async fn form_and_query_params() {
        let (mut exchange, _client) = open(
            b"POST /form?a=1 HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 11\r\n\r\nb=2&a=three",
        )
        .await;
        exchange.read_request().await.unwrap();

        let params = exchange.params().await.unwrap();
        assert_eq!(params.get_all("a").collect::<Vec<_>>(), vec!["1", "three"]);
        assert_eq!(params.get("b"), Some("2"));
    }

    #[tokio::test]
    async fn headers_frozen_after_commit() {
        let (mut exchange, _client) = open(b"GET / HTTP/1.1\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.flush().await.unwrap();

        assert!(exchange.is_committed());
        assert!(matches!(exchange.set_header(CONTENT_TYPE, HeaderValue::from_static("x/y")), Err(SendError::HeadersCommitted)));
        assert!(exchange.reset_response().is_err());
    }

    #[tokio::test]
    async fn output_cap_is_a_framing_error() {
        let config = ExchangeConfig { max_output_bytes: Some(4), ..ExchangeConfig::default() };
        let (mut exchange, _client) = open_with(b"GET / HTTP/1.1\r\n\r\n", config).await;
        exchange.read_request().await.unwrap();
        assert!(matches!(exchange.write(b"12345").await, Err(SendError::OutputLimitExceeded { limit: 4 })));
    }

    #[tokio::test]
    async fn reset_clears_request_state() {
        let (mut exchange, _client) = open(b"GET /x?y=1 HTTP/1.1\r\nA: b\r\n\r\n").await;
        exchange.read_request().await.unwrap();
        exchange.attributes_mut().insert(7u32);
        exchange.set_status(StatusCode::ACCEPTED).unwrap();

        exchange.reset();
        assert_eq!(exchange.state(), ExchangeState::Idle);
        assert_eq!(exchange.path(), "");
        assert!(exchange.query().is_none());
        assert!(exchange.headers().is_empty());
        assert!(exchange.attributes().get::<u32>().is_none());
        assert_eq!(exchange.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_request_line() {
        let (mut exchange, _client) = open(b"GARBAGE\r\n\r\n").await;
        let err = exchange.read_request().await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn descend_path_segments() {
        let root = PathSegments::new("/dav/docs/a.txt");
        let dav = root.descend(4).unwrap();
        assert_eq!(dav, PathSegments { context: String::new(), component: "/dav".into(), resource: "/docs/a.txt".into() });

        let docs = dav.descend(5).unwrap();
        assert_eq!(docs.context, "/dav");
        assert_eq!(docs.component, "/docs");
        assert_eq!(docs.resource, "/a.txt");
        assert_eq!(docs.full_path(), "/dav/docs/a.txt");
    }
}
