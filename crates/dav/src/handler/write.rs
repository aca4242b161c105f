use http::StatusCode;
use loom_http::connection::Exchange;
use loom_http::protocol::PayloadSize;
use tracing::debug;

use super::dav::{Change, DavHandler};
use super::{DavRequest, respond_status, respond_xml};
use crate::error::DavError;
use crate::headers::Depth;
use crate::path;
use crate::range::ContentRange;
use crate::xml::MultiStatus;

/// Per-resource failures of an operation on a tree.
pub(super) type Failures = Vec<(String, bool, StatusCode)>;

/// Answers `success` if nothing failed, a multi-status listing the failures otherwise.
pub(super) async fn report(exchange: &mut Exchange, request: &DavRequest, failures: Failures, success: StatusCode) -> Result<(), DavError> {
    if failures.is_empty() {
        return respond_status(exchange, success).await;
    }
    let mut multistatus = MultiStatus::new();
    for (path, collection, status) in &failures {
        multistatus.add_status(&request.href(path, *collection), *status);
    }
    respond_xml(exchange, StatusCode::MULTI_STATUS, multistatus.to_xml()?).await
}

impl DavHandler {
    pub(super) async fn put(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let path = request.path.as_str();
        let existing = self.adapter().metadata(path).await?;
        if path == "/" || existing.as_ref().is_some_and(|meta| meta.is_collection) {
            return Err(DavError::MethodNotAllowed);
        }
        if existing.is_none() {
            self.ensure_parent(path).await?;
        }
        self.check_write(request, path, if existing.is_some() { Change::Modify } else { Change::Create }).await?;

        let created = match exchange.header("Content-Range").map(ContentRange::parse).transpose()? {
            Some(range) => {
                if let PayloadSize::Length(length) = exchange.request_payload_size()
                    && length != range.byte_count()
                {
                    return Err(DavError::bad_request(format!("{range} does not match a body of {length} bytes")));
                }
                debug!(path, %range, "partial put");
                let created = existing.is_none() && self.adapter().create_file(path).await?;
                self.receive(exchange, path, range.start).await?;
                created
            }
            None => {
                let created = self.adapter().create_file(path).await?;
                self.receive(exchange, path, 0).await?;
                created
            }
        };

        respond_status(exchange, if created { StatusCode::CREATED } else { StatusCode::NO_CONTENT }).await
    }

    /// Writes the request body into `path` from `offset` on, chunk by chunk.
    async fn receive(&self, exchange: &mut Exchange, path: &str, mut offset: u64) -> Result<u64, DavError> {
        let chunk_size = self.config().chunk_size;
        while let Some(chunk) = exchange.read_chunk(chunk_size).await? {
            self.adapter().write_at(path, offset, &chunk).await?;
            offset += chunk.len() as u64;
        }
        Ok(offset)
    }

    pub(super) async fn delete(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let path = request.path.as_str();
        let meta = self.adapter().metadata(path).await?.ok_or(DavError::NotFound)?;
        if path == "/" {
            return Err(DavError::forbidden("the root cannot be deleted"));
        }
        if meta.is_collection && Depth::parse(exchange.header("Depth"), Depth::Infinity)? != Depth::Infinity {
            return Err(DavError::bad_request("collections are deleted with Depth: infinity"));
        }
        self.check_write(request, path, Change::Remove).await?;

        let failures = self.delete_tree(request, path).await?;
        report(exchange, request, failures, StatusCode::NO_CONTENT).await
    }

    /// Deletes `root` and everything below it, members first.
    ///
    /// Every resource is checked against the submitted lock tokens on its own; a locked one
    /// fails with `424` and so do the collections containing it, while the rest is deleted.
    pub(super) async fn delete_tree(&self, request: &DavRequest, root: &str) -> Result<Failures, DavError> {
        let Some(meta) = self.adapter().metadata(root).await? else {
            return Ok(Vec::new());
        };
        let tree = self.walk(root, meta, Depth::Infinity).await?;
        let tokens = request.conditions.tokens();

        let mut failures: Failures = Vec::new();
        for (path, meta) in tree.iter().rev() {
            let status = if failures.iter().any(|(failed, _, _)| path::is_within(path, failed)) {
                Some(StatusCode::FAILED_DEPENDENCY)
            } else if !self.locks().is_access_allowed(path, tokens) {
                debug!(path, "locked member is kept");
                Some(StatusCode::FAILED_DEPENDENCY)
            } else {
                match self.adapter().remove(path).await {
                    Ok(()) => {
                        self.locks().remove_locks(path);
                        None
                    }
                    Err(e) => Some(e.status()),
                }
            };
            if let Some(status) = status {
                failures.push((path.clone(), meta.is_collection, status));
            }
        }
        failures.reverse();
        Ok(failures)
    }

    pub(super) async fn mkcol(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let path = request.path.as_str();
        if !exchange.request_payload_size().is_empty() {
            return Err(DavError::UnsupportedMediaType("MKCOL takes no body".to_owned()));
        }
        if self.adapter().metadata(path).await?.is_some() {
            return Err(DavError::MethodNotAllowed);
        }
        self.ensure_parent(path).await?;
        self.check_write(request, path, Change::Create).await?;

        self.adapter().create_collection(path).await?;
        respond_status(exchange, StatusCode::CREATED).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loom_http::handler::Handler;

    use super::*;
    use crate::adapter::{MemoryResourceAdapter, ResourceAdapter};
    use crate::handler::DavConfig;
    use crate::handler::testing::send;
    use crate::lock::{LockDepth, LockPolicy, LockRequest, LockScope};

    fn dav() -> (Arc<dyn Handler>, Arc<MemoryResourceAdapter>) {
        let adapter = Arc::new(MemoryResourceAdapter::new());
        let handler: Arc<dyn Handler> = Arc::new(DavHandler::new(Arc::clone(&adapter) as Arc<dyn ResourceAdapter>, DavConfig::default()));
        (handler, adapter)
    }

    #[tokio::test]
    async fn put_creates_then_replaces() {
        let (handler, adapter) = dav();
        assert_eq!(send(Arc::clone(&handler), "PUT", "/f.txt", &[], "first").await.status, 201);
        assert_eq!(send(Arc::clone(&handler), "PUT", "/f.txt", &[], "second").await.status, 204);
        assert_eq!(adapter.read("/f.txt", 0, 100).await.unwrap().as_ref(), b"second");

        assert_eq!(send(Arc::clone(&handler), "PUT", "/missing/f.txt", &[], "x").await.status, 409);
        assert_eq!(send(handler, "PUT", "/", &[], "x").await.status, 405);
    }

    #[tokio::test]
    async fn partial_put() {
        let (handler, adapter) = dav();
        send(Arc::clone(&handler), "PUT", "/f", &[], "0123456789").await;

        let reply = send(Arc::clone(&handler), "PUT", "/f", &[("Content-Range", "bytes 2-4/10")], "abc").await;
        assert_eq!(reply.status, 204);
        assert_eq!(adapter.read("/f", 0, 100).await.unwrap().as_ref(), b"01abc56789");

        assert_eq!(send(Arc::clone(&handler), "PUT", "/f", &[("Content-Range", "bytes 0-1/10, 4-5/10")], "ab").await.status, 415);
        assert_eq!(send(Arc::clone(&handler), "PUT", "/f", &[("Content-Range", "bytes 8-10/10")], "abc").await.status, 416);
        let unbounded = [("Content-Range", "bytes 0-18446744073709551615/*")];
        assert_eq!(send(Arc::clone(&handler), "PUT", "/f", &unbounded, "ab").await.status, 416);
        assert_eq!(send(handler, "PUT", "/f", &[("Content-Range", "bytes 0-3/10")], "ab").await.status, 400);
    }

    #[tokio::test]
    async fn mkcol_and_delete() {
        let (handler, adapter) = dav();
        assert_eq!(send(Arc::clone(&handler), "MKCOL", "/c", &[], "").await.status, 201);
        assert_eq!(send(Arc::clone(&handler), "MKCOL", "/c", &[], "").await.status, 405);
        assert_eq!(send(Arc::clone(&handler), "MKCOL", "/x/y", &[], "").await.status, 409);
        assert_eq!(send(Arc::clone(&handler), "MKCOL", "/d", &[], "<body/>").await.status, 415);

        send(Arc::clone(&handler), "PUT", "/c/f", &[], "x").await;
        assert_eq!(send(Arc::clone(&handler), "DELETE", "/c", &[("Depth", "0")], "").await.status, 400);
        assert_eq!(send(Arc::clone(&handler), "DELETE", "/c", &[], "").await.status, 204);
        assert!(adapter.metadata("/c").await.unwrap().is_none());
        assert_eq!(send(handler, "DELETE", "/c", &[], "").await.status, 404);
    }

    #[tokio::test]
    async fn locked_member_survives_delete() {
        let (handler, adapter) = dav();
        for dir in ["/c", "/c/sub"] {
            adapter.create_collection(dir).await.unwrap();
        }
        for file in ["/c/a", "/c/b", "/c/sub/x"] {
            adapter.create_file(file).await.unwrap();
        }

        let locks = adapter.lock_manager();
        let request = LockRequest { scope: LockScope::Exclusive, depth: LockDepth::Zero, owner: None, timeouts: vec![] };
        let lock = locks.create_lock(&request, &LockPolicy::default()).unwrap();
        locks.lock_resource(&lock.token, "/c/b").unwrap();

        let reply = send(Arc::clone(&handler), "DELETE", "/c", &[], "").await;
        assert_eq!(reply.status, 207);
        assert!(reply.body.contains("/c/b</D:href>"), "{}", reply.body);
        assert!(reply.body.contains("/c/</D:href>"), "{}", reply.body);
        assert_eq!(reply.body.matches("424 Failed Dependency").count(), 2);

        assert!(adapter.metadata("/c/a").await.unwrap().is_none());
        assert!(adapter.metadata("/c/sub").await.unwrap().is_none());
        assert!(adapter.metadata("/c/b").await.unwrap().is_some());

        assert_eq!(send(Arc::clone(&handler), "DELETE", "/c/b", &[], "").await.status, 423);
        let token = format!("(<{}>)", lock.token);
        assert_eq!(send(handler, "DELETE", "/c/b", &[("If", token.as_str())], "").await.status, 204);
        assert!(locks.find_lock(&lock.token).is_none());
    }
}
