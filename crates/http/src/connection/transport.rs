use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Addresses of the transport an exchange runs on. Either may be unknown for in-memory
/// transports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
}

/// A duplex byte transport split into its two halves.
pub struct Connection {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
    pub(crate) info: ConnectionInfo,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("info", &self.info).finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps an accepted TCP stream.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let info = ConnectionInfo { peer_addr: Some(stream.peer_addr()?), local_addr: Some(stream.local_addr()?) };
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader: Box::new(reader), writer: Box::new(writer), info })
    }

    /// Wraps any duplex stream, such as `tokio::io::duplex` in tests.
    pub fn from_io<T>(io: T, info: ConnectionInfo) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self { reader: Box::new(reader), writer: Box::new(writer), info }
    }

    /// Wraps separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W, info: ConnectionInfo) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { reader: Box::new(reader), writer: Box::new(writer), info }
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info
    }
}
