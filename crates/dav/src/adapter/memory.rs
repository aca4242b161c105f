use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use xmltree::Element;

use super::{Metadata, ResourceAdapter, patch_list};
use crate::error::DavError;
use crate::lock::{LockManager, MemoryLockManager};
use crate::path;
use crate::xml::PropertyName;

#[derive(Debug, Clone)]
enum Content {
    File(Vec<u8>),
    Collection,
}

#[derive(Debug, Clone)]
struct Node {
    content: Content,
    modified: SystemTime,
    version: u64,
    properties: Vec<Element>,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    next_version: u64,
}

impl Tree {
    fn version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn node(&self, path: &str) -> Result<&Node, DavError> {
        self.nodes.get(path).ok_or(DavError::NotFound)
    }

    fn file_mut(&mut self, path: &str) -> Result<&mut Vec<u8>, DavError> {
        let version = self.version();
        let node = self.nodes.get_mut(path).ok_or(DavError::NotFound)?;
        node.version = version;
        node.modified = SystemTime::now();
        match &mut node.content {
            Content::File(data) => Ok(data),
            Content::Collection => Err(DavError::MethodNotAllowed),
        }
    }

    fn ensure_parent(&self, path: &str) -> Result<(), DavError> {
        let parent = path::parent(path).ok_or_else(|| DavError::forbidden("the root has no parent"))?;
        match self.nodes.get(parent) {
            Some(Node { content: Content::Collection, .. }) => Ok(()),
            _ => Err(DavError::conflict(format!("{parent} is not a collection"))),
        }
    }

    fn insert(&mut self, path: &str, content: Content, properties: Vec<Element>) {
        let version = self.version();
        self.nodes.insert(path.to_owned(), Node { content, modified: SystemTime::now(), version, properties });
    }
}

/// Resources kept in memory, lost on drop.
#[derive(Debug)]
pub struct MemoryResourceAdapter {
    tree: Mutex<Tree>,
    locks: MemoryLockManager,
}

impl Default for MemoryResourceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResourceAdapter {
    /// An adapter holding only the root collection.
    pub fn new() -> Self {
        let mut tree = Tree { nodes: BTreeMap::new(), next_version: 0 };
        tree.insert("/", Content::Collection, Vec::new());
        Self { tree: Mutex::new(tree), locks: MemoryLockManager::new() }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResourceAdapter for MemoryResourceAdapter {
    async fn metadata(&self, path: &str) -> Result<Option<Metadata>, DavError> {
        Ok(self.tree().nodes.get(path).map(|node| {
            let (is_collection, length) = match &node.content {
                Content::File(data) => (false, data.len() as u64),
                Content::Collection => (true, 0),
            };
            Metadata { is_collection, length, modified: node.modified, etag: format!("\"{length:x}-{:x}\"", node.version) }
        }))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, DavError> {
        let tree = self.tree();
        if !matches!(tree.node(path)?.content, Content::Collection) {
            return Err(DavError::conflict(format!("{path} is not a collection")));
        }
        Ok(tree.nodes.keys().filter(|key| path::parent(key) == Some(path)).cloned().collect())
    }

    async fn read(&self, path: &str, offset: u64, len: usize) -> Result<Bytes, DavError> {
        let tree = self.tree();
        let Content::File(data) = &tree.node(path)?.content else {
            return Err(DavError::forbidden("a collection has no content"));
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn create_file(&self, path: &str) -> Result<bool, DavError> {
        let mut tree = self.tree();
        if tree.nodes.contains_key(path) {
            tree.file_mut(path)?.clear();
            return Ok(false);
        }
        tree.ensure_parent(path)?;
        tree.insert(path, Content::File(Vec::new()), Vec::new());
        Ok(true)
    }

    async fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), DavError> {
        let mut tree = self.tree();
        let file = tree.file_mut(path)?;
        let start = usize::try_from(offset).map_err(|e| DavError::bad_request(e.to_string()))?;
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn create_collection(&self, path: &str) -> Result<(), DavError> {
        let mut tree = self.tree();
        if tree.nodes.contains_key(path) {
            return Err(DavError::MethodNotAllowed);
        }
        tree.ensure_parent(path)?;
        tree.insert(path, Content::Collection, Vec::new());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), DavError> {
        let mut tree = self.tree();
        tree.node(path)?;
        if tree.nodes.keys().any(|key| path::parent(key) == Some(path)) {
            return Err(DavError::conflict(format!("{path} is not empty")));
        }
        tree.nodes.remove(path);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), DavError> {
        let mut tree = self.tree();
        let source = tree.node(from)?.clone();
        tree.ensure_parent(to)?;
        match (&source.content, tree.nodes.get(to).map(|node| &node.content)) {
            (Content::File(_), Some(Content::Collection)) | (Content::Collection, Some(Content::File(_))) => {
                return Err(DavError::conflict(format!("{to} exists with another kind")));
            }
            _ => {}
        }
        tree.insert(to, source.content, source.properties);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DavError> {
        let mut tree = self.tree();
        tree.node(from)?;
        if tree.nodes.contains_key(to) {
            return Err(DavError::conflict(format!("{to} exists")));
        }
        tree.ensure_parent(to)?;
        if path::is_within(from, to) {
            return Err(DavError::forbidden("cannot move a collection into itself"));
        }

        let moved: Vec<String> = tree.nodes.keys().filter(|key| path::is_within(from, key)).cloned().collect();
        for key in moved {
            if let Some(node) = tree.nodes.remove(&key) {
                tree.nodes.insert(path::rebase(&key, from, to), node);
            }
        }
        Ok(())
    }

    async fn dead_properties(&self, path: &str) -> Result<Vec<Element>, DavError> {
        Ok(self.tree().node(path)?.properties.clone())
    }

    async fn patch_properties(&self, path: &str, set: Vec<Element>, remove: Vec<PropertyName>) -> Result<(), DavError> {
        let mut tree = self.tree();
        let node = tree.nodes.get_mut(path).ok_or(DavError::NotFound)?;
        patch_list(&mut node.properties, set, &remove);
        Ok(())
    }

    fn lock_manager(&self) -> &dyn LockManager {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn behaves_like_an_adapter() {
        super::super::tests::exercise(&MemoryResourceAdapter::new()).await;
    }

    #[tokio::test]
    async fn etag_changes_on_write() {
        let adapter = MemoryResourceAdapter::new();
        adapter.create_file("/f").await.unwrap();
        let before = adapter.metadata("/f").await.unwrap().unwrap().etag;
        adapter.write_at("/f", 0, b"x").await.unwrap();
        assert_ne!(adapter.metadata("/f").await.unwrap().unwrap().etag, before);
    }

    #[tokio::test]
    async fn structure_is_enforced() {
        let adapter = MemoryResourceAdapter::new();
        assert_eq!(adapter.create_file("/no/f").await.unwrap_err().status(), http::StatusCode::CONFLICT);
        adapter.create_collection("/c").await.unwrap();
        assert_eq!(adapter.create_collection("/c").await.unwrap_err().status(), http::StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(adapter.write_at("/c", 0, b"x").await.unwrap_err().status(), http::StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(adapter.rename("/c", "/c/inner").await.unwrap_err().status(), http::StatusCode::FORBIDDEN);
    }
}
