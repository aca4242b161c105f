//! Connection handling.
//!
//! - [`Connection`]: a duplex transport split in a read and a write half, plus its
//!   [`ConnectionInfo`]
//! - [`Exchange`]: the request/response state machine, reused for every request of a connection
//! - [`HttpConnection`]: the loop serving sequential requests until the connection can't persist

mod exchange;
mod http_connection;
mod transport;

pub use exchange::{DEFAULT_MAX_FORM_BYTES, Exchange, ExchangeConfig, ExchangeState, PathSegments};
pub use http_connection::HttpConnection;
pub use transport::{BoxedReader, BoxedWriter, Connection, ConnectionInfo};
