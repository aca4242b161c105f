use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_http::connection::Exchange;
use loom_http::handler::{Handler, HandlerError};
use tracing::debug;

use super::file::FileHandler;
use super::{DavConfig, DavRequest, conclude};
use crate::adapter::{Metadata, ResourceAdapter};
use crate::condition::ResourceState;
use crate::error::DavError;
use crate::headers::Depth;
use crate::lock::LockManager;
use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DavMethod {
    Options,
    Get,
    Head,
    Put,
    Delete,
    Mkcol,
    Copy,
    Move,
    Propfind,
    Proppatch,
    Lock,
    Unlock,
}

const METHODS: [(&str, DavMethod); 12] = [
    ("OPTIONS", DavMethod::Options),
    ("GET", DavMethod::Get),
    ("HEAD", DavMethod::Head),
    ("PUT", DavMethod::Put),
    ("DELETE", DavMethod::Delete),
    ("MKCOL", DavMethod::Mkcol),
    ("COPY", DavMethod::Copy),
    ("MOVE", DavMethod::Move),
    ("PROPFIND", DavMethod::Propfind),
    ("PROPPATCH", DavMethod::Proppatch),
    ("LOCK", DavMethod::Lock),
    ("UNLOCK", DavMethod::Unlock),
];

/// How an operation changes a resource, which decides the lock checks it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Change {
    /// content or properties of an existing resource
    Modify,
    /// a new member of the parent collection
    Create,
    /// removal from the parent collection
    Remove,
}

/// A WebDAV class 2 handler: content, collections, properties and write locks.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use loom_dav::{DavConfig, DavHandler, MemoryResourceAdapter};
/// use loom_web::{PathPattern, Router};
///
/// let dav = DavHandler::new(Arc::new(MemoryResourceAdapter::new()), DavConfig::default());
/// let router = Router::builder().route(PathPattern::prefix("/dav"), dav).build();
/// ```
#[derive(Debug)]
pub struct DavHandler {
    pub(super) files: FileHandler,
    methods: HashMap<&'static str, DavMethod>,
    allow: String,
}

impl DavHandler {
    pub fn new(adapter: Arc<dyn ResourceAdapter>, config: DavConfig) -> Self {
        let methods = METHODS.into_iter().collect();
        let allow = METHODS.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ");
        Self { files: FileHandler::new(adapter, config), methods, allow }
    }

    pub fn adapter(&self) -> &Arc<dyn ResourceAdapter> {
        self.files.adapter()
    }

    pub fn config(&self) -> &DavConfig {
        self.files.config()
    }

    pub(super) fn locks(&self) -> &dyn LockManager {
        self.files.adapter().lock_manager()
    }

    async fn dispatch(&self, exchange: &mut Exchange) -> Result<(), DavError> {
        let Some(&method) = self.methods.get(exchange.method().as_str()) else {
            return FileHandler::not_allowed(exchange, &self.allow).await;
        };
        let request = DavRequest::from_exchange(exchange)?;
        debug!(method = %exchange.method(), path = request.path, "dav request");

        match method {
            DavMethod::Options => self.files.options(exchange, &self.allow, true),
            DavMethod::Get | DavMethod::Head => self.files.get(exchange, &request).await,
            DavMethod::Put => self.put(exchange, &request).await,
            DavMethod::Delete => self.delete(exchange, &request).await,
            DavMethod::Mkcol => self.mkcol(exchange, &request).await,
            DavMethod::Copy => self.copy_or_move(exchange, &request, false).await,
            DavMethod::Move => self.copy_or_move(exchange, &request, true).await,
            DavMethod::Propfind => self.propfind(exchange, &request).await,
            DavMethod::Proppatch => self.proppatch(exchange, &request).await,
            DavMethod::Lock => self.lock(exchange, &request).await,
            DavMethod::Unlock => self.unlock(exchange, &request).await,
        }
    }

    pub(super) async fn state_of(&self, path: &str) -> Result<ResourceState, DavError> {
        let etag = self.adapter().metadata(path).await?.map(|meta| meta.etag);
        let tokens = self.locks().get_locks(path).into_iter().map(|lock| lock.token).collect();
        Ok(ResourceState { etag, tokens })
    }

    /// Evaluates the `If` header and the locks before `path` changes.
    ///
    /// Fails with `412` when the header does not hold for `path` or its parent, and with
    /// `423` when a lock protecting `path`, or its parent for membership changes, was not
    /// submitted.
    pub(super) async fn check_write(&self, request: &DavRequest, path: &str, change: Change) -> Result<(), DavError> {
        let is_target = path == request.path;
        let parent = path::parent(path);

        let state = self.state_of(path).await?;
        let parent_state = match parent {
            Some(parent) if change == Change::Create || request.conditions.applies_to(parent, false) => Some(self.state_of(parent).await?),
            _ => None,
        };

        let creating_under = if change == Change::Create { parent_state.as_ref() } else { None };
        if !request.conditions.evaluate(path, is_target, &state, creating_under) {
            return Err(DavError::precondition_failed(format!("If header does not hold for {path}")));
        }
        if let (Some(parent), Some(parent_state)) = (parent, parent_state.as_ref())
            && !request.conditions.evaluate(parent, false, parent_state, None)
        {
            return Err(DavError::precondition_failed(format!("If header does not hold for {parent}")));
        }

        let tokens = request.conditions.tokens();
        if !self.locks().is_access_allowed(path, tokens) {
            debug!(path, "resource is locked");
            return Err(DavError::Locked);
        }
        if change != Change::Modify
            && let Some(parent) = parent
            && !self.locks().is_access_allowed(parent, tokens)
        {
            debug!(path, parent, "parent collection is locked");
            return Err(DavError::Locked);
        }
        Ok(())
    }

    /// Requires the parent of `path` to be an existing collection.
    pub(super) async fn ensure_parent(&self, path: &str) -> Result<(), DavError> {
        let parent = path::parent(path).ok_or_else(|| DavError::forbidden("the root has no parent"))?;
        match self.adapter().metadata(parent).await? {
            Some(meta) if meta.is_collection => Ok(()),
            _ => Err(DavError::conflict(format!("{parent} is not a collection"))),
        }
    }

    /// `root` and, to the given depth, its members, parents before children.
    pub(super) async fn walk(&self, root: &str, meta: Metadata, depth: Depth) -> Result<Vec<(String, Metadata)>, DavError> {
        let mut found = Vec::new();
        let mut pending = vec![(root.to_owned(), meta, 0usize)];
        while let Some((path, meta, level)) = pending.pop() {
            let descend = meta.is_collection && (depth == Depth::Infinity || (depth == Depth::One && level == 0));
            found.push((path.clone(), meta));
            if !descend {
                continue;
            }
            let children = self.adapter().children(&path).await?;
            for child in children.into_iter().rev() {
                if let Some(meta) = self.adapter().metadata(&child).await? {
                    pending.push((child, meta, level + 1));
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Handler for DavHandler {
    async fn handle(&self, exchange: &mut Exchange) -> Result<(), HandlerError> {
        let result = self.dispatch(exchange).await;
        conclude(exchange, result).await
    }
}
