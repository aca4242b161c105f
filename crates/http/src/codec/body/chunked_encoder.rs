use std::io::Write;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::FastWrite;
use crate::protocol::{PayloadItem, SendError};

/// Frames each non-empty chunk as `<hex size>\r\n<data>\r\n`, the end of the body as `0\r\n\r\n`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Err(SendError::Completed);
        }

        match item {
            PayloadItem::Chunk(mut bytes) => {
                // an empty chunk would read as the terminator
                if !bytes.has_remaining() {
                    return Ok(());
                }
                dst.reserve(bytes.remaining() + 12);
                write!(FastWrite(dst), "{:X}\r\n", bytes.remaining())?;
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(len);
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::body::chunked_decoder::ChunkedDecoder;
    use tokio_util::codec::Decoder;

    #[test]
    fn test_framing() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello world, hello!")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"13\r\nhello world, hello!\r\n0\r\n\r\n");
        assert!(encoder.is_finish());
        assert!(encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"late")), &mut dst).is_err());
    }

    #[test]
    fn test_round_trip() {
        let inputs: [&[u8]; 5] = [b"", b"a", b"\r\n0\r\n\r\n", &[0u8; 4097], b"0123456789abcdef0"];

        for input in inputs {
            let mut encoder = ChunkedEncoder::new();
            let mut wire = BytesMut::new();
            for piece in input.chunks(1000) {
                encoder.encode(PayloadItem::Chunk(Bytes::copy_from_slice(piece)), &mut wire).unwrap();
            }
            encoder.encode(PayloadItem::<Bytes>::Eof, &mut wire).unwrap();

            let mut decoder = ChunkedDecoder::new();
            let mut output = Vec::new();
            while let PayloadItem::Chunk(bytes) = decoder.decode(&mut wire).unwrap().unwrap() {
                output.extend_from_slice(&bytes);
            }
            assert_eq!(output, input);
            assert!(wire.is_empty());
        }
    }
}
