//! Decoder for the chunked transfer coding.
//!
//! Each chunk is a hex size line (optionally followed by `;extensions`), the chunk data and a CRLF.
//! A zero-sized chunk ends the body, optionally followed by trailer fields and a final CRLF.
//! Extensions and trailers are consumed and ignored.
//!
//! See [RFC 9112 Section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1).

use std::task::Poll;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};
use ChunkedState::{Body, BodyCr, BodyLf, End, EndCr, EndLf, Extension, Size, SizeLf, SizeLws, Trailer, TrailerLf};

/// Largest number of hex digits accepted in a chunk size line, enough for a `u64`.
const MAX_SIZE_DIGITS: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
    digits: u8,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining: 0, digits: 0 }
    }

    /// Returns true once the terminating zero-sized chunk and trailers have been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == End
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut data = None;
            self.state = match self.step(src, &mut data) {
                Poll::Pending => return Ok(None),
                Poll::Ready(result) => result?,
            };

            if let Some(bytes) = data {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => Err(ParseError::invalid_chunk("connection closed before the last chunk")),
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.is_empty() {
            return Poll::Pending;
        }
        $src.get_u8()
    }};
}

impl ChunkedDecoder {
    fn step(&mut self, src: &mut BytesMut, data: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        match self.state {
            Size => self.read_size(src),
            SizeLws => read_size_lws(src),
            Extension => read_extension(src),
            SizeLf => self.read_size_lf(src),
            Body => self.read_body(src, data),
            BodyCr => expect_byte(src, b'\r', BodyLf, "missing CR after chunk data"),
            BodyLf => expect_byte(src, b'\n', Size, "missing LF after chunk data"),
            Trailer => read_trailer(src),
            TrailerLf => expect_byte(src, b'\n', EndCr, "missing LF after trailer field"),
            EndCr => read_end_cr(src),
            EndLf => expect_byte(src, b'\n', End, "missing LF after last chunk"),
            End => Poll::Ready(Ok(End)),
        }
    }

    fn read_size(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        let byte = try_next_byte!(src);
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b'\t' | b' ' if self.digits > 0 => return Poll::Ready(Ok(SizeLws)),
            b';' if self.digits > 0 => return Poll::Ready(Ok(Extension)),
            b'\r' if self.digits > 0 => return Poll::Ready(Ok(SizeLf)),
            _ => return Poll::Ready(Err(ParseError::invalid_chunk(format!("invalid chunk size byte 0x{byte:02x}")))),
        };

        self.digits += 1;
        if self.digits > MAX_SIZE_DIGITS {
            return Poll::Ready(Err(ParseError::invalid_chunk("chunk size overflow")));
        }
        self.remaining = (self.remaining << 4) | u64::from(digit);
        Poll::Ready(Ok(Size))
    }

    fn read_size_lf(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        if try_next_byte!(src) != b'\n' {
            return Poll::Ready(Err(ParseError::invalid_chunk("missing LF after chunk size")));
        }
        self.digits = 0;
        if self.remaining == 0 { Poll::Ready(Ok(EndCr)) } else { Poll::Ready(Ok(Body)) }
    }

    fn read_body(&mut self, src: &mut BytesMut, data: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        if src.is_empty() {
            return Poll::Pending;
        }

        let len = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(src.len());
        self.remaining -= len as u64;
        *data = Some(src.split_to(len).freeze());

        if self.remaining > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }
}

fn expect_byte(
    src: &mut BytesMut,
    expected: u8,
    next: ChunkedState,
    reason: &'static str,
) -> Poll<Result<ChunkedState, ParseError>> {
    if try_next_byte!(src) == expected { Poll::Ready(Ok(next)) } else { Poll::Ready(Err(ParseError::invalid_chunk(reason))) }
}

fn read_size_lws(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
        b';' => Poll::Ready(Ok(Extension)),
        b'\r' => Poll::Ready(Ok(SizeLf)),
        _ => Poll::Ready(Err(ParseError::invalid_chunk("unexpected byte after chunk size"))),
    }
}

fn read_extension(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    // a bare LF inside an extension is rejected, extensions only end at CRLF
    match try_next_byte!(src) {
        b'\r' => Poll::Ready(Ok(SizeLf)),
        b'\n' => Poll::Ready(Err(ParseError::invalid_chunk("chunk extension contains a bare LF"))),
        _ => Poll::Ready(Ok(Extension)),
    }
}

fn read_trailer(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        b'\r' => Poll::Ready(Ok(TrailerLf)),
        _ => Poll::Ready(Ok(Trailer)),
    }
}

fn read_end_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        b'\r' => Poll::Ready(Ok(EndLf)),
        _ => Poll::Ready(Ok(Trailer)),
    }
}
