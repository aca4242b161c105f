use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::trace;
use xmltree::Element;

use super::{Metadata, ResourceAdapter, patch_list};
use crate::error::DavError;
use crate::lock::{LockManager, MemoryLockManager};
use crate::path;
use crate::xml::PropertyName;

/// Resources stored below a directory of the local file system.
///
/// Dead properties and locks live in memory only.
#[derive(Debug)]
pub struct FsResourceAdapter {
    root: PathBuf,
    properties: Mutex<HashMap<String, Vec<Element>>>,
    locks: MemoryLockManager,
}

fn missing_parent(e: io::Error) -> DavError {
    if e.kind() == io::ErrorKind::NotFound { DavError::conflict("parent collection is missing") } else { e.into() }
}

impl FsResourceAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), properties: Mutex::new(HashMap::new()), locks: MemoryLockManager::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local(&self, path: &str) -> PathBuf {
        let mut local = self.root.clone();
        local.extend(path.split('/').filter(|segment| !segment.is_empty()));
        local
    }

    fn properties(&self) -> MutexGuard<'_, HashMap<String, Vec<Element>>> {
        self.properties.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn stat(&self, path: &str) -> Result<Option<std::fs::Metadata>, DavError> {
        match fs::metadata(self.local(path)).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ResourceAdapter for FsResourceAdapter {
    async fn metadata(&self, path: &str) -> Result<Option<Metadata>, DavError> {
        let Some(metadata) = self.stat(path).await? else {
            return Ok(None);
        };
        let modified = metadata.modified()?;
        let stamp = modified.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
        let length = if metadata.is_dir() { 0 } else { metadata.len() };
        Ok(Some(Metadata { is_collection: metadata.is_dir(), length, modified, etag: format!("\"{length:x}-{stamp:x}\"") }))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, DavError> {
        let mut entries = fs::read_dir(self.local(path)).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match entry.file_name().into_string() {
                Ok(name) => children.push(path::join(path, &name)),
                Err(name) => trace!(?name, "skipping a name that is not utf-8"),
            }
        }
        children.sort();
        Ok(children)
    }

    async fn read(&self, path: &str, offset: u64, len: usize) -> Result<Bytes, DavError> {
        let mut file = fs::File::open(self.local(path)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len.min(64 * 1024));
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn create_file(&self, path: &str) -> Result<bool, DavError> {
        let existed = match self.stat(path).await? {
            Some(metadata) if metadata.is_dir() => return Err(DavError::MethodNotAllowed),
            Some(_) => true,
            None => false,
        };
        OpenOptions::new().write(true).create(true).truncate(true).open(self.local(path)).await.map_err(missing_parent)?;
        Ok(!existed)
    }

    async fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), DavError> {
        let mut file = OpenOptions::new().write(true).open(self.local(path)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn create_collection(&self, path: &str) -> Result<(), DavError> {
        if self.stat(path).await?.is_some() {
            return Err(DavError::MethodNotAllowed);
        }
        fs::create_dir(self.local(path)).await.map_err(missing_parent)
    }

    async fn remove(&self, path: &str) -> Result<(), DavError> {
        let metadata = self.stat(path).await?.ok_or(DavError::NotFound)?;
        if metadata.is_dir() {
            fs::remove_dir(self.local(path)).await?;
        } else {
            fs::remove_file(self.local(path)).await?;
        }
        self.properties().remove(path);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), DavError> {
        let metadata = self.stat(from).await?.ok_or(DavError::NotFound)?;
        if metadata.is_dir() {
            match fs::create_dir(self.local(to)).await {
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                result => result.map_err(missing_parent)?,
            }
        } else {
            fs::copy(self.local(from), self.local(to)).await.map_err(missing_parent)?;
        }

        let mut properties = self.properties();
        match properties.get(from).cloned() {
            Some(copied) => properties.insert(to.to_owned(), copied),
            None => properties.remove(to),
        };
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DavError> {
        if path::is_within(from, to) {
            return Err(DavError::forbidden("cannot move a collection into itself"));
        }
        fs::rename(self.local(from), self.local(to)).await.map_err(missing_parent)?;

        let mut properties = self.properties();
        let moved: Vec<String> = properties.keys().filter(|key| path::is_within(from, key)).cloned().collect();
        for key in moved {
            if let Some(entry) = properties.remove(&key) {
                properties.insert(path::rebase(&key, from, to), entry);
            }
        }
        Ok(())
    }

    async fn dead_properties(&self, path: &str) -> Result<Vec<Element>, DavError> {
        Ok(self.properties().get(path).cloned().unwrap_or_default())
    }

    async fn patch_properties(&self, path: &str, set: Vec<Element>, remove: Vec<PropertyName>) -> Result<(), DavError> {
        if self.stat(path).await?.is_none() {
            return Err(DavError::NotFound);
        }
        let mut properties = self.properties();
        let entry = properties.entry(path.to_owned()).or_default();
        patch_list(entry, set, &remove);
        if entry.is_empty() {
            properties.remove(path);
        }
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
        let dir = tempfile::tempdir().unwrap();
        super::super::tests::exercise(&FsResourceAdapter::new(dir.path())).await;
    }

    #[tokio::test]
    async fn maps_paths_below_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsResourceAdapter::new(dir.path());
        adapter.create_collection("/a").await.unwrap();
        adapter.create_file("/a/b.txt").await.unwrap();
        adapter.write_at("/a/b.txt", 0, b"on disk").await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("a").join("b.txt")).unwrap(), b"on disk");
        assert_eq!(adapter.create_file("/missing/x").await.unwrap_err().status(), http::StatusCode::CONFLICT);
    }
}
