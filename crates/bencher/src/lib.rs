//! Inputs shared by the loom benchmarks.

use std::fmt::Write;

/// A named benchmark input.
#[derive(Debug, Clone)]
pub struct Input {
    name: &'static str,
    size: InputSize,
    bytes: Vec<u8>,
}

impl Input {
    pub fn new(name: &'static str, size: InputSize, bytes: impl Into<Vec<u8>>) -> Self {
        Self { name, size, bytes: bytes.into() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> InputSize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSize {
    Small,
    Normal,
    Large,
}

/// The header block of a bare `GET`.
pub const SMALL_HEADERS: &str = "Host: localhost:8080\r\nAccept: */*\r\n\r\n";

/// The header block of a browser request.
pub const BROWSER_HEADERS: &str = "Host: localhost:8080\r\n\
    User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0\r\n\
    Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
    Accept-Language: en-US,en;q=0.5\r\n\
    Accept-Encoding: gzip, deflate, br, zstd\r\n\
    Connection: keep-alive\r\n\
    Cookie: session=4f1c2a7e9b3d48e6a0c5f2d1b7e8a9c3; theme=dark; lang=en\r\n\
    Upgrade-Insecure-Requests: 1\r\n\
    Sec-Fetch-Dest: document\r\n\
    Sec-Fetch-Mode: navigate\r\n\
    Sec-Fetch-Site: none\r\n\
    Sec-Fetch-User: ?1\r\n\
    Priority: u=0, i\r\n\r\n";

/// The header block of a WebDAV client request.
pub const DAV_HEADERS: &str = "Host: localhost:8080\r\n\
    User-Agent: Microsoft-WebDAV-MiniRedir/10.0.19045\r\n\
    Depth: 1\r\n\
    Translate: f\r\n\
    If: </dav/report.txt> (<opaquelocktoken:181d4fae-7d8c-11d0-a765-00a0c91e6bf2> [\"5-1a\"])\r\n\
    Content-Type: application/xml; charset=utf-8\r\n\
    Content-Length: 0\r\n\r\n";

/// A chunked body of `len` bytes cut into chunks of `chunk` bytes, with its last chunk.
pub fn chunked_body(len: usize, chunk: usize) -> Vec<u8> {
    let mut out = String::new();
    let mut left = len;
    while left > 0 {
        let size = left.min(chunk);
        let _ = write!(out, "{size:x}\r\n{}\r\n", "x".repeat(size));
        left -= size;
    }
    out.push_str("0\r\n\r\n");
    out.into_bytes()
}
