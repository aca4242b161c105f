//! Protocol types shared by the codecs, the streams and the exchange.
//!
//! - [`message`]: payload items and body framing ([`PayloadItem`], [`PayloadSize`])
//! - [`request`]: the parsed request head with its ordered header list
//! - [`response`]: the response head, an `http::Response<()>`
//! - [`params`]: lazily parsed query and form parameters
//! - [`error`]: [`ParseError`] for the read side, [`SendError`] for the write side, [`HttpError`] for both

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::HeaderList;
pub use request::RequestHead;

mod response;
pub use response::ResponseHead;

mod params;
pub use params::Params;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
