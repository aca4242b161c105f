//! Buffered, framing-aware read side of a connection.
//!
//! The reader owns the raw bytes received from the transport. Protocol lines and request heads
//! are decoded straight out of that buffer, bodies go through a [`PayloadDecoder`] chosen per
//! request. Body bytes never bleed into the next request: [`FramedReader::drain`] consumes
//! whatever the handler left unread so the transport stays aligned on message boundaries.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::PayloadDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Default size of a single read from the transport
pub const DEFAULT_READ_BUFFER: usize = 8 * 1024;

#[derive(Debug)]
enum MarkState {
    None,
    Active { recorded: BytesMut, limit: usize },
    Expired,
}

#[derive(Debug)]
pub struct FramedReader<R> {
    io: R,
    /// raw transport bytes not consumed yet
    buf: BytesMut,
    capacity: usize,
    decoder: PayloadDecoder,
    /// decoded body bytes not handed out yet
    pending: Bytes,
    mark: MarkState,
    io_eof: bool,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(io: R) -> Self {
        Self::with_capacity(io, DEFAULT_READ_BUFFER)
    }

    pub fn with_capacity(io: R, capacity: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(capacity),
            capacity: capacity.max(1),
            decoder: PayloadDecoder::empty(),
            pending: Bytes::new(),
            mark: MarkState::None,
            io_eof: false,
        }
    }

    /// Selects the body framing for the message whose head was just decoded.
    pub fn set_payload(&mut self, size: PayloadSize) {
        self.decoder = PayloadDecoder::from(size);
        self.pending = Bytes::new();
        self.mark = MarkState::None;
    }

    /// Returns true once the transport reported EOF and every buffered byte was consumed.
    pub fn is_closed(&self) -> bool {
        self.io_eof && self.buf.is_empty()
    }

    /// Returns true when the current body has been read to its end.
    pub fn is_body_finished(&self) -> bool {
        self.pending.is_empty() && self.decoder.is_finished()
    }

    async fn fill_buf(&mut self) -> io::Result<usize> {
        if self.io_eof {
            return Ok(0);
        }
        self.buf.reserve(self.capacity);
        let n = self.io.read_buf(&mut self.buf).await?;
        if n == 0 {
            trace!("transport reached eof");
            self.io_eof = true;
        }
        Ok(n)
    }

    /// Decodes the next frame out of the raw buffer with `decoder`, reading from the transport
    /// as needed. `None` means the transport closed cleanly before a frame started.
    pub async fn decode_frame<D>(&mut self, decoder: &mut D) -> Result<Option<D::Item>, D::Error>
    where
        D: Decoder,
    {
        loop {
            if let Some(frame) = decoder.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }
            if self.fill_buf().await? == 0 {
                return decoder.decode_eof(&mut self.buf);
            }
        }
    }

    /// Reads one protocol line terminated by CRLF or a bare LF, without the terminator.
    ///
    /// Returns `None` when the transport closes before any byte of the line arrived.
    pub async fn read_line(&mut self, max_len: usize) -> Result<Option<String>, ParseError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return String::from_utf8(line.to_vec()).map(Some).map_err(|_| ParseError::invalid_header("line is not utf-8"));
            }
            if self.buf.len() > max_len {
                return Err(ParseError::too_large_header(self.buf.len(), max_len));
            }
            if self.fill_buf().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ParseError::invalid_header("connection closed inside a line"));
            }
        }
    }

    async fn next_body_bytes(&mut self) -> Result<Option<Bytes>, ParseError> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        loop {
            let item = match self.decoder.decode(&mut self.buf)? {
                Some(item) => item,
                None => {
                    if self.fill_buf().await? > 0 {
                        continue;
                    }
                    self.decoder.decode_eof(&mut self.buf)?.unwrap_or(PayloadItem::Eof)
                }
            };
            match item {
                PayloadItem::Chunk(bytes) if bytes.is_empty() => {}
                PayloadItem::Chunk(bytes) => return Ok(Some(bytes)),
                PayloadItem::Eof => return Ok(None),
            }
        }
    }

    fn record(&mut self, bytes: &[u8]) {
        if let MarkState::Active { recorded, limit } = &mut self.mark {
            let limit = *limit;
            if recorded.len() + bytes.len() > limit {
                trace!(limit, "read past the mark limit, mark expired");
                self.mark = MarkState::Expired;
            } else {
                recorded.extend_from_slice(bytes);
            }
        }
    }

    /// Hands out at most `max` body bytes, `None` at the end of the body.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>, ParseError> {
        let Some(mut bytes) = self.next_body_bytes().await? else {
            return Ok(None);
        };
        if bytes.len() > max.max(1) {
            self.pending = bytes.split_off(max.max(1));
        }
        self.record(&bytes);
        Ok(Some(bytes))
    }

    /// Fills as much of `dst` as the next body chunk allows, 0 at the end of the body.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        if dst.is_empty() {
            return Ok(0);
        }
        match self.read_chunk(dst.len()).await? {
            Some(bytes) => {
                dst[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            None => Ok(0),
        }
    }

    pub async fn read_byte(&mut self) -> Result<Option<u8>, ParseError> {
        Ok(self.read_chunk(1).await?.map(|bytes| bytes[0]))
    }

    /// Reads the rest of the body, failing once it grows past `limit` bytes.
    pub async fn read_to_end(&mut self, limit: usize) -> Result<Bytes, ParseError> {
        let mut body = BytesMut::new();
        while let Some(bytes) = self.read_chunk(usize::MAX).await? {
            if body.len() + bytes.len() > limit {
                return Err(ParseError::BodyTooLarge { limit });
            }
            body.extend_from_slice(&bytes);
        }
        Ok(body.freeze())
    }

    /// Discards up to `n` body bytes, returning how many were skipped.
    pub async fn skip(&mut self, n: u64) -> Result<u64, ParseError> {
        let mut skipped = 0u64;
        while skipped < n {
            let want = usize::try_from(n - skipped).unwrap_or(usize::MAX);
            match self.read_chunk(want).await? {
                Some(bytes) => skipped += bytes.len() as u64,
                None => break,
            }
        }
        Ok(skipped)
    }

    /// Body bytes that can be read without touching the transport.
    pub fn available(&mut self) -> Result<usize, ParseError> {
        if self.pending.is_empty() {
            if let Some(PayloadItem::Chunk(bytes)) = self.decoder.decode(&mut self.buf)? {
                self.pending = bytes;
            }
        }
        Ok(self.pending.len())
    }

    /// Starts recording body bytes so that [`reset`](Self::reset) can replay up to `limit` of them.
    pub fn mark(&mut self, limit: usize) {
        self.mark = MarkState::Active { recorded: BytesMut::with_capacity(limit.min(self.capacity)), limit };
    }

    /// Rewinds the body to the last mark. The mark stays in place.
    pub fn reset(&mut self) -> Result<(), ParseError> {
        match &mut self.mark {
            MarkState::Active { recorded, .. } => {
                let mut replay = recorded.split();
                replay.extend_from_slice(&self.pending);
                self.pending = replay.freeze();
                Ok(())
            }
            MarkState::None | MarkState::Expired => Err(ParseError::MarkExpired),
        }
    }

    /// Reads and throws away the rest of the current body.
    pub async fn drain(&mut self) -> Result<u64, ParseError> {
        self.mark = MarkState::None;
        let mut drained = self.pending.len() as u64;
        self.pending = Bytes::new();
        while let Some(bytes) = self.next_body_bytes().await? {
            drained += bytes.len() as u64;
        }
        if drained > 0 {
            trace!(drained, "drained unread body bytes");
        }
        Ok(drained)
    }

    /// Bytes received from the transport but not consumed by any frame yet.
    pub fn buffered(&self) -> &[u8] {
        self.buf.chunk()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::HeaderDecoder;

    fn framed(bytes: &'static [u8]) -> FramedReader<Cursor<&'static [u8]>> {
        FramedReader::with_capacity(Cursor::new(bytes), 4)
    }

    #[tokio::test]
    async fn length_bounded_body_stops_at_declared_length() {
        let mut reader = framed(b"hello worldGET");
        reader.set_payload(PayloadSize::Length(11));

        let body = reader.read_to_end(1024).await.unwrap();
        assert_eq!(&body[..], b"hello world");
        assert!(reader.is_body_finished());
        assert!(reader.read_chunk(16).await.unwrap().is_none());
        assert!(reader.buffered().starts_with(b"G"));
    }

    #[tokio::test]
    async fn chunked_body_across_small_reads() {
        let mut reader = framed(b"3\r\nabc\r\nA\r\n0123456789\r\n0\r\n\r\n");
        reader.set_payload(PayloadSize::Chunked);

        let body = reader.read_to_end(1024).await.unwrap();
        assert_eq!(&body[..], b"abc0123456789");
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let mut reader = framed(b"abc");
        reader.set_payload(PayloadSize::Length(10));

        assert!(reader.read_to_end(1024).await.is_err());
    }

    #[tokio::test]
    async fn unbounded_body_runs_to_eof() {
        let mut reader = framed(b"until the end");
        reader.set_payload(PayloadSize::Unbounded);

        assert_eq!(&reader.read_to_end(1024).await.unwrap()[..], b"until the end");
    }

    #[tokio::test]
    async fn read_to_end_respects_limit() {
        let mut reader = framed(b"0123456789");
        reader.set_payload(PayloadSize::Length(10));

        assert!(matches!(reader.read_to_end(5).await, Err(ParseError::BodyTooLarge { limit: 5 })));
    }

    #[tokio::test]
    async fn byte_and_slice_reads() {
        let mut reader = framed(b"xyz123");
        reader.set_payload(PayloadSize::Length(6));

        assert_eq!(reader.read_byte().await.unwrap(), Some(b'x'));
        let mut dst = [0u8; 2];
        assert_eq!(reader.read(&mut dst).await.unwrap(), 2);
        assert_eq!(&dst, b"yz");
        assert_eq!(reader.skip(100).await.unwrap(), 3);
        assert_eq!(reader.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn mark_and_reset_replays_bytes() {
        let mut reader = framed(b"abcdefgh");
        reader.set_payload(PayloadSize::Length(8));

        assert_eq!(reader.read_byte().await.unwrap(), Some(b'a'));
        reader.mark(4);
        let mut dst = [0u8; 3];
        let n = reader.read(&mut dst).await.unwrap();
        assert_eq!(&dst[..n], &b"bcd"[..n]);

        reader.reset().unwrap();
        let rest = reader.read_to_end(64).await.unwrap();
        assert_eq!(&rest[..], b"bcdefgh");
    }

    #[tokio::test]
    async fn mark_expires_past_its_limit() {
        let mut reader = framed(b"abcdefgh");
        reader.set_payload(PayloadSize::Length(8));

        assert!(matches!(reader.reset(), Err(ParseError::MarkExpired)));
        reader.mark(2);
        reader.skip(5).await.unwrap();
        assert!(matches!(reader.reset(), Err(ParseError::MarkExpired)));
    }

    #[tokio::test]
    async fn drain_realigns_on_next_request() {
        let mut reader = framed(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\nGET /next HTTP/1.1\r\n\r\n");
        reader.set_payload(PayloadSize::Chunked);

        assert_eq!(reader.read_byte().await.unwrap(), Some(b'h'));
        assert_eq!(reader.drain().await.unwrap(), 10);

        assert_eq!(reader.read_line(64).await.unwrap().as_deref(), Some("GET /next HTTP/1.1"));
        let headers = reader.decode_frame(&mut HeaderDecoder::default()).await.unwrap().unwrap();
        assert!(headers.is_empty());
        assert_eq!(reader.read_line(64).await.unwrap(), None);
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn read_line_accepts_crlf_and_lf() {
        let mut reader = framed(b"first line\r\nsecond\nlast");

        assert_eq!(reader.read_line(64).await.unwrap().as_deref(), Some("first line"));
        assert_eq!(reader.read_line(64).await.unwrap().as_deref(), Some("second"));
        assert!(reader.read_line(64).await.is_err());
    }

    #[tokio::test]
    async fn read_line_limit() {
        let mut reader = framed(b"a very long protocol line without end");
        assert!(matches!(reader.read_line(8).await, Err(ParseError::TooLargeHeader { .. })));

        let mut reader = framed(b"");
        assert_eq!(reader.read_line(8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn available_does_not_block() {
        let mut reader = framed(b"");
        reader.set_payload(PayloadSize::Length(3));
        assert_eq!(reader.available().unwrap(), 0);
    }
}
