//! Response head type.
//!
//! A response head is an `http::Response<()>`: status, version and headers, with the body
//! streamed separately through the exchange.

use http::Response;

pub type ResponseHead = Response<()>;
