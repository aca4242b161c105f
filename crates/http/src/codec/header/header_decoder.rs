//! Request head decoding.
//!
//! The request line is parsed on its own by [`parse_request_line`], the header block that follows
//! it by [`HeaderDecoder`] using `httparse`. The decoder enforces the configured size and count
//! limits, [`request_payload_size`] derives the body framing from the parsed fields.
//!
//! Only HTTP/1.0 and HTTP/1.1 are accepted.

use bytes::{Buf, BytesMut};
use http::{Method, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{HeaderList, ParseError, PayloadSize};

/// Default maximum number of header fields
pub const MAX_HEADER_NUM: usize = 64;

/// Default maximum size of the request line, and of the header block
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Splits a request line into method, raw target and protocol version.
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(protocol), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(ParseError::invalid_request_line(format!("expected three tokens in {line:?}")));
    };

    ensure!(!method.is_empty(), ParseError::invalid_request_line("empty method"));
    let method = Method::from_bytes(method.as_bytes()).map_err(|e| ParseError::invalid_request_line(e.to_string()))?;

    ensure!(is_valid_target(target), ParseError::InvalidUri);

    let version = match protocol {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        p if p.starts_with("HTTP/") => return Err(ParseError::InvalidVersion(p.to_owned())),
        p => return Err(ParseError::invalid_request_line(format!("unknown protocol {p:?}"))),
    };

    Ok((method, target.to_owned(), version))
}

/// origin-form, absolute-form or the asterisk form of OPTIONS
fn is_valid_target(target: &str) -> bool {
    target.starts_with('/') || target == "*" || target.starts_with("http://") || target.starts_with("https://")
}

/// Decoder for the header block following the request line, up to and including the empty line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderDecoder {
    max_headers: usize,
    max_bytes: usize,
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(MAX_HEADER_NUM, MAX_HEADER_BYTES)
    }
}

impl HeaderDecoder {
    pub fn new(max_headers: usize, max_bytes: usize) -> Self {
        Self { max_headers, max_bytes }
    }
}

impl Decoder for HeaderDecoder {
    type Item = HeaderList;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let status = httparse::parse_headers(&src[..], &mut headers).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        match status {
            Status::Complete((block_len, fields)) => {
                trace!(block_len, count = fields.len(), "parsed header block");
                ensure!(block_len <= self.max_bytes, ParseError::too_large_header(block_len, self.max_bytes));

                let mut list = HeaderList::with_capacity(fields.len());
                for field in fields {
                    list.append(field.name, String::from_utf8_lossy(field.value).into_owned());
                }

                src.advance(block_len);
                Ok(Some(list))
            }
            Status::Partial => {
                ensure!(src.len() <= self.max_bytes, ParseError::too_large_header(src.len(), self.max_bytes));
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => Err(ParseError::invalid_header("connection closed inside the header block")),
        }
    }
}

/// Determines how the request body is framed.
///
/// A request with `Transfer-Encoding` must end its codings with `chunked`, and may not carry
/// `Content-Length` too. Without either header there is no body.
pub fn request_payload_size(headers: &HeaderList) -> Result<PayloadSize, ParseError> {
    // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length
    let te_header = headers.get("Transfer-Encoding");
    let cl_header = headers.get("Content-Length");

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (Some(te_value), None) => {
            ensure!(is_chunked(te_value), ParseError::invalid_header(format!("unsupported transfer-encoding {te_value}")));
            Ok(PayloadSize::new_chunked())
        }

        (None, Some(_)) => {
            let mut length = None;
            for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
                let parsed = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ParseError::invalid_content_length(format!("value {value} is not u64")))?;
                match length {
                    Some(previous) if previous != parsed => {
                        return Err(ParseError::invalid_content_length("conflicting content-length values"));
                    }
                    _ => length = Some(parsed),
                }
            }
            Ok(PayloadSize::new_length(length.unwrap_or_default()))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// Returns true if `chunked` is the final coding of the field value.
fn is_chunked(value: &str) -> bool {
    value.rsplit(',').next().is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use indoc::indoc;

    use super::*;

    fn crlf(str: &str) -> BytesMut {
        BytesMut::from(str.replace('\n', "\r\n").as_bytes())
    }

    fn fields(raw: &str) -> HeaderList {
        HeaderDecoder::default().decode(&mut crlf(raw)).unwrap().unwrap()
    }

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked("chunked"));
        assert!(is_chunked("gzip, Chunked"));
        assert!(!is_chunked("chunked, gzip"));
        assert!(!is_chunked("gzip"));
    }

    #[test]
    fn request_lines() {
        let (method, target, version) = parse_request_line("GET /index.html?a=1 HTTP/1.1").unwrap();
        assert_eq!(method, Method::GET);
        assert_eq!(target, "/index.html?a=1");
        assert_eq!(version, Version::HTTP_11);

        let (method, _, version) = parse_request_line("PROPFIND /dav/%20x HTTP/1.0").unwrap();
        assert_eq!(method.as_str(), "PROPFIND");
        assert_eq!(version, Version::HTTP_10);

        assert_eq!(parse_request_line("OPTIONS * HTTP/1.1").unwrap().1, "*");
    }

    #[test]
    fn bad_request_lines() {
        let status = |line: &str| parse_request_line(line).unwrap_err().status();

        assert_eq!(status("GET / HTTP/2.0"), StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        assert_eq!(status("GET /"), StatusCode::BAD_REQUEST);
        assert_eq!(status("GET / HTTP/1.1 extra"), StatusCode::BAD_REQUEST);
        assert_eq!(status("GET index HTTP/1.1"), StatusCode::BAD_REQUEST);
        assert_eq!(status("G(T / HTTP/1.1"), StatusCode::BAD_REQUEST);
        assert_eq!(status("GET / SPDY/3"), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_remaining_bytes_stay_in_buffer() {
        let mut bytes = crlf(indoc! {r##"
        Host: 127.0.0.1:8080
        Content-Length: 3

        123"##});

        let headers = HeaderDecoder::default().decode(&mut bytes).unwrap().unwrap();

        assert_eq!(request_payload_size(&headers).unwrap(), PayloadSize::Length(3));
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let headers = fields(indoc! {r##"
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##});

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("accept"), Some("*/*"));
        assert_eq!(headers.get("HOST"), Some("127.0.0.1:8080"));
        assert_eq!(headers.get("User-Agent"), Some("curl/7.79.1"));
        assert!(request_payload_size(&headers).unwrap().is_empty());
    }

    #[test]
    fn keeps_names_as_received() {
        let headers = fields(indoc! {r##"
        host: localhost
        Depth: 1
        X-Custom-HEADER: a
        x-custom-header: b

        "##});

        let names: Vec<_> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["host", "Depth", "X-Custom-HEADER", "x-custom-header"]);
        assert_eq!(headers.get_all("x-custom-header").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn empty_header_block() {
        let mut buf = BytesMut::from(&b"\r\nnext"[..]);
        assert!(HeaderDecoder::default().decode(&mut buf).unwrap().unwrap().is_empty());
        assert_eq!(&buf[..], b"next");
    }

    #[test]
    fn partial_block_needs_more_bytes() {
        let mut buf = BytesMut::from(&b"Host: a"[..]);
        assert!(HeaderDecoder::default().decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);
        assert!(HeaderDecoder::default().decode_eof(&mut buf).is_err());
    }

    #[test]
    fn rejects_too_many_headers() {
        let mut raw = String::new();
        for i in 0..5 {
            raw.push_str(&format!("X-{i}: v\r\n"));
        }
        raw.push_str("\r\n");

        let err = HeaderDecoder::new(4, MAX_HEADER_BYTES).decode(&mut BytesMut::from(raw.as_bytes())).unwrap_err();
        assert!(matches!(err, ParseError::TooManyHeaders { .. }));
        assert_eq!(err.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
    }

    #[test]
    fn rejects_oversized_block() {
        let raw = format!("X-Big: {}\r\n", "a".repeat(200));
        let err = HeaderDecoder::new(MAX_HEADER_NUM, 128).decode(&mut BytesMut::from(raw.as_bytes())).unwrap_err();
        assert!(matches!(err, ParseError::TooLargeHeader { .. }));
    }

    #[test]
    fn rejects_malformed_field() {
        let mut buf = BytesMut::from(&b"No colon here\r\n\r\n"[..]);
        assert_eq!(HeaderDecoder::default().decode(&mut buf).unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn framing_headers() {
        let cases = [
            ("Transfer-Encoding: chunked\r\n", Some(PayloadSize::Chunked)),
            ("Content-Length: 10\r\n", Some(PayloadSize::Length(10))),
            ("Content-Length: 0\r\n", Some(PayloadSize::Empty)),
            ("Content-Length: 7\r\nContent-Length: 7\r\n", Some(PayloadSize::Length(7))),
            ("Content-Length: 7\r\nContent-Length: 8\r\n", None),
            ("Content-Length: -1\r\n", None),
            ("Transfer-Encoding: gzip\r\n", None),
            ("Transfer-Encoding: chunked\r\nContent-Length: 3\r\n", None),
        ];

        for (raw, expected) in cases {
            let headers = HeaderDecoder::default().decode(&mut BytesMut::from(format!("{raw}\r\n").as_bytes())).unwrap().unwrap();
            match expected {
                Some(size) => assert_eq!(request_payload_size(&headers).unwrap(), size, "{raw}"),
                None => assert!(request_payload_size(&headers).is_err(), "{raw}"),
            }
        }
    }
}
