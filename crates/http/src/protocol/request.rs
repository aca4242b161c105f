//! Request head types.
//!
//! Header names are kept exactly as the peer sent them and in arrival order, lookups compare
//! names case-insensitively.

use http::{Method, Version};

/// Ordered, multi-valued list of request header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.entries.iter().filter(move |(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns true if any comma separated element of any `name` field equals `token`,
    /// ignoring ASCII case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).flat_map(|v| v.split(',')).any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The request line and header block of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// request target exactly as received, still percent-encoded
    pub target: String,
    pub version: Version,
    pub headers: HeaderList,
}

impl RequestHead {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// Returns true if the client asked for an interim `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11 && self.headers.has_token("Expect", "100-continue")
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case_and_keeps_order() {
        let mut headers = HeaderList::new();
        headers.append("Host", "example.com");
        headers.append("X-Tag", "a");
        headers.append("x-tag", "b");
        headers.append("Connection", "Upgrade, Keep-Alive");

        assert_eq!(headers.get("host"), Some("example.com"));
        assert_eq!(headers.get_all("X-TAG").collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(headers.has_token("connection", "keep-alive"));
        assert!(!headers.has_token("connection", "close"));

        let names: Vec<_> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Host", "X-Tag", "x-tag", "Connection"]);
    }

    #[test]
    fn expect_continue_needs_http_11() {
        let mut headers = HeaderList::new();
        headers.append("Expect", "100-Continue");

        let mut head = RequestHead { method: Method::PUT, target: "/f".into(), version: Version::HTTP_11, headers };
        assert!(head.expects_continue());

        head.version = Version::HTTP_10;
        assert!(!head.expects_continue());
    }
}
