//! Storage behind the WebDAV handlers.
//!
//! A [`ResourceAdapter`] maps normalized resource paths (see [`crate::path`]) to files and
//! collections, and supplies the [`LockManager`] guarding them. Operations act on one
//! resource; walking trees is up to the handlers.

mod fs;
mod memory;

use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use xmltree::Element;

pub use fs::FsResourceAdapter;
pub use memory::MemoryResourceAdapter;

use crate::error::DavError;
use crate::lock::LockManager;
use crate::xml::PropertyName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub is_collection: bool,
    /// content length, zero for collections
    pub length: u64,
    pub modified: SystemTime,
    /// quoted entity tag
    pub etag: String,
}

#[async_trait]
pub trait ResourceAdapter: Send + Sync + std::fmt::Debug {
    /// `None` if nothing exists at `path`.
    async fn metadata(&self, path: &str) -> Result<Option<Metadata>, DavError>;

    /// The paths of the members of a collection, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>, DavError>;

    /// Reads up to `len` bytes starting at `offset`.
    async fn read(&self, path: &str, offset: u64, len: usize) -> Result<Bytes, DavError>;

    /// Creates an empty file or truncates an existing one. Returns true if it was created.
    async fn create_file(&self, path: &str) -> Result<bool, DavError>;

    /// Writes `data` at `offset`, zero filling any gap past the end.
    async fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), DavError>;

    async fn create_collection(&self, path: &str) -> Result<(), DavError>;

    /// Removes a file or an empty collection along with its dead properties.
    async fn remove(&self, path: &str) -> Result<(), DavError>;

    /// Copies one resource: a file with its content, a collection as an empty collection.
    /// Dead properties are copied along.
    async fn copy(&self, from: &str, to: &str) -> Result<(), DavError>;

    /// Moves a resource and everything below it.
    async fn rename(&self, from: &str, to: &str) -> Result<(), DavError>;

    async fn dead_properties(&self, path: &str) -> Result<Vec<Element>, DavError>;

    /// Stores and removes dead properties of `path`, setting before removing.
    async fn patch_properties(&self, path: &str, set: Vec<Element>, remove: Vec<PropertyName>) -> Result<(), DavError>;

    fn lock_manager(&self) -> &dyn LockManager;
}

/// Applies `set` and `remove` to a list of dead properties.
pub(crate) fn patch_list(properties: &mut Vec<Element>, set: Vec<Element>, remove: &[PropertyName]) {
    for element in set {
        let name = PropertyName::of(&element);
        properties.retain(|existing| PropertyName::of(existing) != name);
        properties.push(element);
    }
    properties.retain(|existing| !remove.contains(&PropertyName::of(existing)));
}
