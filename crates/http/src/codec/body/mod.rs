//! Body framing for request and response payloads.
//!
//! ## Decoders
//! - [`PayloadDecoder`]: picks the length, chunked or unbounded strategy for one message
//!
//! ## Encoders
//! - [`PayloadEncoder`]: the write-side counterpart, rejecting bytes beyond the declared length

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::ChunkedEncoder;
pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
