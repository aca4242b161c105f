//! Response head encoder.
//!
//! Writes the status line and header block, after stamping the framing headers that match the
//! chosen [`PayloadSize`]. Interim (1xx) heads are written as a bare status line.

use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, StatusCode, Version, header};
use tokio_util::codec::Encoder;

use crate::codec::FastWrite;
use crate::protocol::{PayloadSize, ResponseHead, SendError};

/// Initial buffer size reserved for a response head
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl<'a> Encoder<(&'a mut ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (&'a mut ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (head, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        write_status_line(head.version(), head.status(), dst)?;

        let headers = head.headers_mut();
        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            PayloadSize::Unbounded => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.remove(header::CONTENT_LENGTH);
            }
        }

        for (header_name, header_value) in head.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes a complete interim response such as `HTTP/1.1 100 Continue`.
pub fn encode_interim(version: Version, status: StatusCode, dst: &mut BytesMut) -> Result<(), SendError> {
    write_status_line(version, status, dst)?;
    dst.put_slice(b"\r\n");
    Ok(())
}

fn write_status_line(version: Version, status: StatusCode, dst: &mut BytesMut) -> Result<(), SendError> {
    let protocol = match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    write!(FastWrite(dst), "{protocol} {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use http::Response;

    use super::*;

    fn encode(mut head: ResponseHead, size: PayloadSize) -> (ResponseHead, String) {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((&mut head, size), &mut dst).unwrap();
        (head, String::from_utf8(dst.to_vec()).unwrap())
    }

    #[test]
    fn length_framing() {
        let head = Response::builder().status(StatusCode::OK).header("X-Test", "1").body(()).unwrap();
        let (head, wire) = encode(head, PayloadSize::Length(5));

        assert_eq!(wire, "HTTP/1.1 200 OK\r\nx-test: 1\r\ncontent-length: 5\r\n\r\n");
        assert_eq!(head.headers().get(header::CONTENT_LENGTH).unwrap(), "5");
    }

    #[test]
    fn chunked_framing_drops_content_length() {
        let head = Response::builder().header(header::CONTENT_LENGTH, "10").body(()).unwrap();
        let (_, wire) = encode(head, PayloadSize::Chunked);

        assert_eq!(wire, "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n");
    }

    #[test]
    fn http_10_status_line() {
        let head = Response::builder().status(StatusCode::NOT_FOUND).version(Version::HTTP_10).body(()).unwrap();
        let (_, wire) = encode(head, PayloadSize::Unbounded);

        assert_eq!(wire, "HTTP/1.0 404 Not Found\r\n\r\n");
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let head = Response::builder().status(599).body(()).unwrap();
        let (_, wire) = encode(head, PayloadSize::Empty);

        assert_eq!(wire, "HTTP/1.1 599 \r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn interim_response() {
        let mut dst = BytesMut::new();
        encode_interim(Version::HTTP_11, StatusCode::CONTINUE, &mut dst).unwrap();
        assert_eq!(&dst[..], b"HTTP/1.1 100 Continue\r\n\r\n");
    }
}
