use std::fmt::Write;
use std::time::SystemTime;

/// One member of a listed collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub href: String,
    pub is_collection: bool,
    pub length: u64,
    pub modified: SystemTime,
}

/// Renders the body answering a `GET` on a collection.
///
/// Without a renderer such a `GET` is refused with `403`.
pub trait ListingRenderer: Send + Sync {
    fn content_type(&self) -> &str;

    fn render(&self, href: &str, entries: &[ListingEntry]) -> String;
}

/// One line per member: its name, a `/` after collections, and the length of files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainListing;

impl ListingRenderer for PlainListing {
    fn content_type(&self) -> &str {
        mime::TEXT_PLAIN_UTF_8.as_ref()
    }

    fn render(&self, href: &str, entries: &[ListingEntry]) -> String {
        let mut out = format!("Index of {href}\n\n");
        for entry in entries {
            if entry.is_collection {
                let _ = writeln!(out, "{}/", entry.name);
            } else {
                let _ = writeln!(out, "{}\t{}", entry.name, entry.length);
            }
        }
        out
    }
}
