//! Framed buffered streams over the two halves of a connection.
//!
//! [`FramedReader`] decodes protocol lines, header blocks and framed bodies from the read half,
//! [`FramedWriter`] buffers and frames response bodies on the write half.

mod reader;
mod writer;

pub use reader::{DEFAULT_READ_BUFFER, FramedReader};
pub use writer::{DEFAULT_WRITE_BUFFER, FramedWriter};
