//! Resource paths.
//!
//! Resource adapters work on normalized absolute paths: a leading `/`, no empty, `.` or `..`
//! segments and no trailing `/` except for the root itself.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters escaped in hrefs, `/` stays as is
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Normalizes `path`, `None` if `..` climbs above the root.
pub fn normalize(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }
    Some(format!("/{}", segments.join("/")))
}

/// The parent collection, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(at) => Some(&path[..at]),
        None => None,
    }
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" { format!("/{name}") } else { format!("{parent}/{name}") }
}

/// The last segment, empty for the root.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Returns true if `path` is `ancestor` or lies below it.
pub fn is_within(ancestor: &str, path: &str) -> bool {
    ancestor == "/" || path == ancestor || path.strip_prefix(ancestor).is_some_and(|rest| rest.starts_with('/'))
}

/// Maps `path` from below `from` to the same place below `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let rest = if from == "/" { path } else { &path[from.len()..] };
    match (to, rest) {
        (to, "") => to.to_owned(),
        ("/", rest) => rest.to_owned(),
        (to, rest) => format!("{to}{rest}"),
    }
}

/// The percent-encoded href of `path` below `mount`, with a trailing `/` for collections.
pub fn href(mount: &str, path: &str, collection: bool) -> String {
    let mut raw = format!("{}{}", mount.trim_end_matches('/'), if path == "/" { "" } else { path });
    if collection || raw.is_empty() {
        raw.push('/');
    }
    utf8_percent_encode(&raw, HREF).to_string()
}

/// Resolves an href or absolute URI naming a resource below `mount` to a resource path.
///
/// `None` if it does not decode or lies outside the mount.
pub fn resolve_href(mount: &str, href: &str) -> Option<String> {
    let target = match href.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |at| &rest[at..]),
        None => href,
    };
    let target = target.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(target).decode_utf8().ok()?;
    let mount = mount.trim_end_matches('/');
    let below = decoded.strip_prefix(mount)?;
    if !below.is_empty() && !below.starts_with('/') {
        return None;
    }
    normalize(below)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes() {
        assert_eq!(normalize("").as_deref(), Some("/"));
        assert_eq!(normalize("/a//b/./c/../d/").as_deref(), Some("/a/b/d"));
        assert_eq!(normalize("/a/../..").as_deref(), None);
    }

    #[test]
    fn parents_and_names() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(name("/a/b.txt"), "b.txt");
        assert_eq!(name("/"), "");
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/a", "x"), "/a/x");
    }

    #[test]
    fn containment() {
        assert!(is_within("/", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a", "/a/b"));
        assert!(!is_within("/a", "/ab"));
        assert_eq!(rebase("/a/b/c", "/a", "/x"), "/x/b/c");
        assert_eq!(rebase("/a", "/a", "/x"), "/x");
        assert_eq!(rebase("/a/b", "/a", "/"), "/b");
    }

    #[test]
    fn hrefs() {
        assert_eq!(href("/dav", "/some file.txt", false), "/dav/some%20file.txt");
        assert_eq!(href("/dav", "/", true), "/dav/");
        assert_eq!(href("", "/", true), "/");
        assert_eq!(href("", "/dir", true), "/dir/");

        assert_eq!(resolve_href("/dav", "http://host:80/dav/a%20b/").as_deref(), Some("/a b"));
        assert_eq!(resolve_href("/dav", "/dav").as_deref(), Some("/"));
        assert_eq!(resolve_href("/dav", "/other/x"), None);
        assert_eq!(resolve_href("/dav", "/davx"), None);
        assert_eq!(resolve_href("", "/x/y").as_deref(), Some("/x/y"));
    }
}
