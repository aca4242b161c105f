//! Buffered write side of a connection.
//!
//! Body bytes are collected in a buffer and only framed once the response head has been
//! written, so a response that fits the buffer can still be sent with an exact
//! `Content-Length`. The head itself is written by the exchange, which decides the framing.

use bytes::{Bytes, BytesMut};
use http::{StatusCode, Version};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::codec::header::encode_interim;
use crate::codec::{HeaderEncoder, PayloadEncoder};
use crate::protocol::{PayloadItem, PayloadSize, ResponseHead, SendError};

/// Default amount of body bytes held back before the response is committed
pub const DEFAULT_WRITE_BUFFER: usize = 8 * 1024;

#[derive(Debug)]
pub struct FramedWriter<W> {
    io: W,
    /// body bytes not framed yet
    body: BytesMut,
    /// framed bytes waiting for the transport
    wire: BytesMut,
    capacity: usize,
    encoder: Option<PayloadEncoder>,
    /// body bytes accepted for the current response
    written: u64,
    max_output: Option<u64>,
    discard_body: bool,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(io: W) -> Self {
        Self::with_capacity(io, DEFAULT_WRITE_BUFFER, None)
    }

    pub fn with_capacity(io: W, capacity: usize, max_output: Option<u64>) -> Self {
        Self {
            io,
            body: BytesMut::with_capacity(capacity),
            wire: BytesMut::with_capacity(capacity),
            capacity: capacity.max(1),
            encoder: None,
            written: 0,
            max_output,
            discard_body: false,
        }
    }

    /// Prepares the writer for the next response on the same connection.
    pub fn reset(&mut self) {
        self.body.clear();
        self.wire.clear();
        self.encoder = None;
        self.written = 0;
        self.discard_body = false;
    }

    pub fn is_head_written(&self) -> bool {
        self.encoder.is_some()
    }

    /// Body bytes written by the handler so far for this response.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Body bytes buffered and not yet framed.
    pub fn buffered_len(&self) -> usize {
        self.body.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if the body buffer reached its capacity and should be flushed.
    pub fn is_full(&self) -> bool {
        self.body.len() >= self.capacity
    }

    /// Accepts body bytes into the buffer.
    pub fn buffer(&mut self, data: &[u8]) -> Result<(), SendError> {
        let total = self.written + data.len() as u64;
        if let Some(limit) = self.max_output
            && total > limit
        {
            return Err(SendError::OutputLimitExceeded { limit });
        }
        if let Some(remaining) = self.encoder.as_ref().and_then(PayloadEncoder::remaining)
            && data.len() as u64 + self.body.len() as u64 > remaining
        {
            return Err(SendError::LengthExceeded { declared: self.written - self.body.len() as u64 + remaining });
        }
        self.body.extend_from_slice(data);
        self.written = total;
        Ok(())
    }

    /// Serializes the response head and selects the body framing. With `discard_body` every
    /// body byte is dropped, as for the response to a HEAD request.
    pub fn write_head(&mut self, head: &mut ResponseHead, size: PayloadSize, discard_body: bool) -> Result<(), SendError> {
        if self.encoder.is_some() {
            return Err(SendError::HeadersCommitted);
        }
        HeaderEncoder.encode((&mut *head, size), &mut self.wire)?;
        self.encoder = Some(if discard_body { PayloadEncoder::unbounded() } else { PayloadEncoder::from(size) });
        self.discard_body = discard_body;
        trace!(status = %head.status(), ?size, discard_body, "wrote response head");
        Ok(())
    }

    /// Sends an interim response such as `100 Continue` right away.
    pub async fn write_interim(&mut self, version: Version, status: StatusCode) -> Result<(), SendError> {
        encode_interim(version, status, &mut self.wire)?;
        self.flush_wire().await
    }

    fn frame_body(&mut self) -> Result<(), SendError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        if self.body.is_empty() {
            return Ok(());
        }
        let body = self.body.split().freeze();
        if self.discard_body {
            return Ok(());
        }
        encoder.encode(PayloadItem::<Bytes>::Chunk(body), &mut self.wire)
    }

    async fn flush_wire(&mut self) -> Result<(), SendError> {
        if !self.wire.is_empty() {
            self.io.write_all(&self.wire).await?;
            self.wire.clear();
        }
        self.io.flush().await?;
        Ok(())
    }

    /// Frames the buffered body and pushes everything to the transport. Body bytes stay
    /// buffered while no head has been written.
    pub async fn flush(&mut self) -> Result<(), SendError> {
        self.frame_body()?;
        self.flush_wire().await
    }

    /// Ends the body: frames what is left, writes the chunk terminator if any and flushes.
    ///
    /// Fails if a `Content-Length` body came up short, the connection can't be reused then.
    pub async fn finish(&mut self) -> Result<(), SendError> {
        self.frame_body()?;
        if let Some(encoder) = self.encoder.as_mut()
            && !self.discard_body
        {
            if encoder.is_chunked() {
                encoder.encode(PayloadItem::<Bytes>::Eof, &mut self.wire)?;
            }
            if let Some(missing) = encoder.remaining().filter(|missing| *missing > 0) {
                self.flush_wire().await?;
                return Err(SendError::invalid_body(format!("response body is {missing} bytes short of its content-length")));
            }
        }
        self.flush_wire().await
    }

    pub async fn shutdown(&mut self) -> Result<(), SendError> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Response;

    use super::*;

    fn head() -> ResponseHead {
        Response::builder().status(StatusCode::OK).body(()).unwrap()
    }

    #[tokio::test]
    async fn chunked_body_with_terminator() {
        let mut writer = FramedWriter::with_capacity(Vec::new(), 4, None);
        writer.write_head(&mut head(), PayloadSize::Chunked, false).unwrap();
        writer.buffer(b"hello").unwrap();
        writer.flush().await.unwrap();
        writer.buffer(b" world").unwrap();
        writer.finish().await.unwrap();

        let wire = String::from_utf8(writer.io.clone()).unwrap();
        assert!(wire.ends_with("\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"), "{wire}");
    }

    #[tokio::test]
    async fn body_stays_buffered_until_head_is_written() {
        let mut writer = FramedWriter::with_capacity(Vec::new(), 64, None);
        writer.buffer(b"abc").unwrap();
        writer.flush().await.unwrap();
        assert!(writer.io.is_empty());
        assert_eq!(writer.buffered_len(), 3);

        writer.write_head(&mut head(), PayloadSize::Length(3), false).unwrap();
        writer.finish().await.unwrap();
        assert!(writer.io.ends_with(b"content-length: 3\r\n\r\nabc"));
    }

    #[tokio::test]
    async fn length_overrun_is_rejected() {
        let mut writer = FramedWriter::with_capacity(Vec::new(), 64, None);
        writer.write_head(&mut head(), PayloadSize::Length(4), false).unwrap();
        writer.buffer(b"abc").unwrap();
        assert!(matches!(writer.buffer(b"de"), Err(SendError::LengthExceeded { declared: 4 })));
    }

    #[tokio::test]
    async fn short_body_fails_finish() {
        let mut writer = FramedWriter::with_capacity(Vec::new(), 64, None);
        writer.write_head(&mut head(), PayloadSize::Length(10), false).unwrap();
        writer.buffer(b"abc").unwrap();
        assert!(writer.finish().await.is_err());
    }

    #[tokio::test]
    async fn output_cap() {
        let mut writer = FramedWriter::with_capacity(Vec::new(), 64, Some(5));
        writer.buffer(b"abc").unwrap();
        assert!(matches!(writer.buffer(b"def"), Err(SendError::OutputLimitExceeded { limit: 5 })));
    }

    #[tokio::test]
    async fn head_request_drops_body() {
        let mut writer = FramedWriter::with_capacity(Vec::new(), 64, None);
        writer.write_head(&mut head(), PayloadSize::Length(5), true).unwrap();
        writer.buffer(b"hello").unwrap();
        writer.finish().await.unwrap();

        let wire = String::from_utf8(writer.io.clone()).unwrap();
        assert!(wire.ends_with("content-length: 5\r\n\r\n"), "{wire}");
    }

    #[tokio::test]
    async fn interim_response_goes_out_immediately() {
        let mut writer = FramedWriter::new(Vec::new());
        writer.write_interim(Version::HTTP_11, StatusCode::CONTINUE).await.unwrap();
        assert_eq!(&writer.io[..], b"HTTP/1.1 100 Continue\r\n\r\n");
        assert!(!writer.is_head_written());
    }
}
