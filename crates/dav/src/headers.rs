//! The WebDAV request headers besides `If`.

use crate::error::DavError;
use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    /// Parses a `Depth` header, `default` when it is absent.
    pub fn parse(value: Option<&str>, default: Depth) -> Result<Depth, DavError> {
        match value.map(str::trim) {
            None => Ok(default),
            Some("0") => Ok(Self::Zero),
            Some("1") => Ok(Self::One),
            Some(depth) if depth.eq_ignore_ascii_case("infinity") => Ok(Self::Infinity),
            Some(depth) => Err(DavError::bad_request(format!("invalid Depth: {depth}"))),
        }
    }
}

/// `Overwrite: T` unless the header says `F`.
pub fn parse_overwrite(value: Option<&str>) -> Result<bool, DavError> {
    match value.map(str::trim) {
        None => Ok(true),
        Some(flag) if flag.eq_ignore_ascii_case("t") => Ok(true),
        Some(flag) if flag.eq_ignore_ascii_case("f") => Ok(false),
        Some(flag) => Err(DavError::bad_request(format!("invalid Overwrite: {flag}"))),
    }
}

/// The token of a `Lock-Token: <token>` header.
pub fn parse_lock_token(value: &str) -> Option<&str> {
    value.trim().strip_prefix('<')?.strip_suffix('>').filter(|token| !token.is_empty())
}

/// The resource path a `Destination` header names below `mount`.
pub fn parse_destination(value: Option<&str>, mount: &str) -> Result<String, DavError> {
    let value = value.ok_or_else(|| DavError::bad_request("missing Destination"))?;
    path::resolve_href(mount, value.trim()).ok_or_else(|| DavError::BadGateway(value.to_owned()))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn depth() {
        assert_eq!(Depth::parse(None, Depth::Infinity).unwrap(), Depth::Infinity);
        assert_eq!(Depth::parse(Some(" 1 "), Depth::Zero).unwrap(), Depth::One);
        assert_eq!(Depth::parse(Some("Infinity"), Depth::Zero).unwrap(), Depth::Infinity);
        assert!(Depth::parse(Some("2"), Depth::Zero).is_err());
    }

    #[test]
    fn overwrite_and_tokens() {
        assert!(parse_overwrite(None).unwrap());
        assert!(!parse_overwrite(Some("F")).unwrap());
        assert!(parse_overwrite(Some("maybe")).is_err());

        assert_eq!(parse_lock_token("<opaquelocktoken:abc>"), Some("opaquelocktoken:abc"));
        assert_eq!(parse_lock_token("opaquelocktoken:abc"), None);
        assert_eq!(parse_lock_token("<>"), None);
    }

    #[test]
    fn destination() {
        assert_eq!(parse_destination(Some("http://localhost/dav/b%20c"), "/dav").unwrap(), "/b c");
        assert_eq!(parse_destination(Some("/elsewhere/x"), "/dav").unwrap_err().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(parse_destination(None, "/dav").unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}
