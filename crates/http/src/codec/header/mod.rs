//! Request head decoding and response head encoding.
//!
//! - [`parse_request_line`]: method, target and protocol of the first request line
//! - [`HeaderDecoder`]: the header block, with size and count limits
//! - [`HeaderEncoder`]: status line plus header block, stamping the framing headers

mod header_decoder;
mod header_encoder;

pub use header_decoder::{HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM, parse_request_line, request_payload_size};
pub use header_encoder::{HeaderEncoder, encode_interim};
