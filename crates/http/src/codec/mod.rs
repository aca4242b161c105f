//! Wire codecs for HTTP/1.x messages.
//!
//! Every codec implements `tokio_util`'s [`Decoder`](tokio_util::codec::Decoder) or
//! [`Encoder`](tokio_util::codec::Encoder) over a `BytesMut`, so the framed streams in
//! [`crate::stream`] can drive them from any buffer.
//!
//! - [`header`]: request head decoding, response head encoding
//! - [`body`]: length, chunked and unbounded body framing

pub mod body;
pub mod header;

pub use body::{ChunkedDecoder, ChunkedEncoder, PayloadDecoder, PayloadEncoder};
pub use header::{HeaderDecoder, HeaderEncoder, MAX_HEADER_BYTES, MAX_HEADER_NUM, parse_request_line, request_payload_size};

use std::io;

use bytes::{BufMut, BytesMut};

/// `io::Write` adapter appending to a `BytesMut`, for `write!` based formatting.
pub(crate) struct FastWrite<'a>(pub(crate) &'a mut BytesMut);

impl io::Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
