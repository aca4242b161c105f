use http::StatusCode;
use loom_http::connection::Exchange;
use tracing::debug;

use super::DavRequest;
use super::dav::{Change, DavHandler};
use super::write::{Failures, report};
use crate::adapter::Metadata;
use crate::error::DavError;
use crate::headers::{self, Depth};
use crate::path;

impl DavHandler {
    pub(super) async fn copy_or_move(&self, exchange: &mut Exchange, request: &DavRequest, is_move: bool) -> Result<(), DavError> {
        let source = request.path.as_str();
        let meta = self.adapter().metadata(source).await?.ok_or(DavError::NotFound)?;
        let destination = headers::parse_destination(exchange.header("Destination"), &request.mount)?;
        if path::is_within(source, &destination) || path::is_within(&destination, source) {
            return Err(DavError::forbidden(format!("{source} and {destination} overlap")));
        }

        let depth = Depth::parse(exchange.header("Depth"), Depth::Infinity)?;
        match (is_move, depth) {
            (true, Depth::Infinity) | (false, Depth::Zero | Depth::Infinity) => {}
            _ => return Err(DavError::bad_request(format!("Depth {depth:?} is not allowed here"))),
        }
        let overwrite = headers::parse_overwrite(exchange.header("Overwrite"))?;

        let replaced = self.adapter().metadata(&destination).await?.is_some();
        if replaced && !overwrite {
            return Err(DavError::precondition_failed(format!("{destination} exists")));
        }
        self.ensure_parent(&destination).await?;
        if is_move {
            self.check_write(request, source, Change::Remove).await?;
        }
        self.check_write(request, &destination, if replaced { Change::Modify } else { Change::Create }).await?;

        if replaced {
            let failures = self.delete_tree(request, &destination).await?;
            if !failures.is_empty() {
                return report(exchange, request, failures, StatusCode::NO_CONTENT).await;
            }
        }

        let failures = if is_move {
            self.move_tree(request, source, &destination, meta).await?
        } else {
            self.copy_tree(source, &destination, meta, depth).await?
        };
        debug!(source, destination, is_move, failed = failures.len(), "transferred");
        report(exchange, request, failures, if replaced { StatusCode::NO_CONTENT } else { StatusCode::CREATED }).await
    }

    /// Copies `source` to `destination` resource by resource, parents first.
    ///
    /// Members of a collection that could not be copied are skipped.
    async fn copy_tree(&self, source: &str, destination: &str, meta: Metadata, depth: Depth) -> Result<Failures, DavError> {
        let mut failures: Failures = Vec::new();
        for (path, meta) in self.walk(source, meta, depth).await? {
            if failures.iter().any(|(failed, _, _)| path::is_within(failed, &path)) {
                continue;
            }
            let target = path::rebase(&path, source, destination);
            if let Err(e) = self.adapter().copy(&path, &target).await {
                debug!(path, target, cause = %e, "copy failed");
                failures.push((path, meta.is_collection, e.status()));
            }
        }
        Ok(failures)
    }

    /// Moves a tree in one step unless some member is locked against the request.
    ///
    /// Otherwise the tree is copied and then deleted, leaving the locked members and their
    /// ancestors in place.
    async fn move_tree(&self, request: &DavRequest, source: &str, destination: &str, meta: Metadata) -> Result<Failures, DavError> {
        let tree = self.walk(source, meta.clone(), Depth::Infinity).await?;
        let tokens = request.conditions.tokens();
        let blocked = tree.iter().any(|(path, _)| !self.locks().is_access_allowed(path, tokens));

        if !blocked {
            self.adapter().rename(source, destination).await?;
            self.locks().remove_locks(source);
            return Ok(Vec::new());
        }

        debug!(source, "locked members, moving by copy");
        let failures = self.copy_tree(source, destination, meta, Depth::Infinity).await?;
        if !failures.is_empty() {
            return Ok(failures);
        }
        self.delete_tree(request, source).await
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

    async fn tree() -> (Arc<dyn Handler>, Arc<MemoryResourceAdapter>) {
        let adapter = Arc::new(MemoryResourceAdapter::new());
        adapter.create_collection("/src").await.unwrap();
        adapter.create_collection("/src/sub").await.unwrap();
        for (file, content) in [("/src/a", "alpha"), ("/src/sub/b", "beta")] {
            adapter.create_file(file).await.unwrap();
            adapter.write_at(file, 0, content.as_bytes()).await.unwrap();
        }
        let handler: Arc<dyn Handler> = Arc::new(DavHandler::new(Arc::clone(&adapter) as Arc<dyn ResourceAdapter>, DavConfig::default()));
        (handler, adapter)
    }

    async fn content(adapter: &MemoryResourceAdapter, path: &str) -> Option<String> {
        adapter.metadata(path).await.unwrap()?;
        Some(String::from_utf8(adapter.read(path, 0, 1024).await.unwrap().to_vec()).unwrap())
    }

    #[tokio::test]
    async fn copy_collection() {
        let (handler, adapter) = tree().await;
        let reply = send(Arc::clone(&handler), "COPY", "/src", &[("Destination", "http://test/dst")], "").await;
        assert_eq!(reply.status, 201);
        assert_eq!(content(&adapter, "/dst/sub/b").await.as_deref(), Some("beta"));
        assert_eq!(content(&adapter, "/src/sub/b").await.as_deref(), Some("beta"));

        let shallow = send(Arc::clone(&handler), "COPY", "/src", &[("Destination", "/shallow"), ("Depth", "0")], "").await;
        assert_eq!(shallow.status, 201);
        assert!(adapter.children("/shallow").await.unwrap().is_empty());

        let again = send(Arc::clone(&handler), "COPY", "/src/a", &[("Destination", "/dst/sub")], "").await;
        assert_eq!(again.status, 204);
        assert_eq!(content(&adapter, "/dst/sub").await.as_deref(), Some("alpha"));
        assert!(adapter.metadata("/dst/sub/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn copy_refusals() {
        let (handler, _) = tree().await;
        let status = |headers: &'static [(&'static str, &'static str)]| {
            let handler = Arc::clone(&handler);
            async move { send(handler, "COPY", "/src", headers, "").await.status }
        };
        assert_eq!(status(&[]).await, 400);
        assert_eq!(status(&[("Destination", "/src/sub/inner")]).await, 403);
        assert_eq!(status(&[("Destination", "/src"), ("Overwrite", "F")]).await, 403);
        assert_eq!(status(&[("Destination", "/nowhere/x")]).await, 409);
        assert_eq!(status(&[("Destination", "/x"), ("Depth", "1")]).await, 400);
        assert_eq!(send(Arc::clone(&handler), "COPY", "/missing", &[("Destination", "/x")], "").await.status, 404);
        let kept = send(handler, "COPY", "/src/a", &[("Destination", "/src/sub/b"), ("Overwrite", "F")], "").await;
        assert_eq!(kept.status, 412);
    }

    #[tokio::test]
    async fn move_collection() {
        let (handler, adapter) = tree().await;
        assert_eq!(send(Arc::clone(&handler), "MOVE", "/src", &[("Destination", "/dst"), ("Depth", "0")], "").await.status, 400);

        let reply = send(Arc::clone(&handler), "MOVE", "/src", &[("Destination", "/dst")], "").await;
        assert_eq!(reply.status, 201);
        assert!(adapter.metadata("/src").await.unwrap().is_none());
        assert_eq!(content(&adapter, "/dst/a").await.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn move_keeps_locked_members() {
        let (handler, adapter) = tree().await;
        let locks = adapter.lock_manager();
        let request = LockRequest { scope: LockScope::Exclusive, depth: LockDepth::Zero, owner: None, timeouts: vec![] };
        let lock = locks.create_lock(&request, &LockPolicy::default()).unwrap();
        locks.lock_resource(&lock.token, "/src/sub/b").unwrap();

        let reply = send(Arc::clone(&handler), "MOVE", "/src", &[("Destination", "/dst")], "").await;
        assert_eq!(reply.status, 207);
        assert_eq!(reply.body.matches("424 Failed Dependency").count(), 3);

        assert_eq!(content(&adapter, "/dst/sub/b").await.as_deref(), Some("beta"));
        assert_eq!(content(&adapter, "/src/sub/b").await.as_deref(), Some("beta"));
        assert!(adapter.metadata("/src/a").await.unwrap().is_none());
        assert!(locks.find_lock(&lock.token).is_some_and(|lock| lock.covers("/src/sub/b")));
    }

    #[tokio::test]
    async fn locked_destination() {
        let (handler, adapter) = tree().await;
        let locks = adapter.lock_manager();
        let request = LockRequest { scope: LockScope::Exclusive, depth: LockDepth::Infinity, owner: None, timeouts: vec![] };
        let lock = locks.create_lock(&request, &LockPolicy::default()).unwrap();
        locks.lock_resource(&lock.token, "/src/sub").unwrap();

        assert_eq!(send(Arc::clone(&handler), "COPY", "/src/a", &[("Destination", "/src/sub/a")], "").await.status, 423);
        let token = format!("(<{}>)", lock.token);
        let reply = send(handler, "COPY", "/src/a", &[("Destination", "/src/sub/a"), ("If", token.as_str())], "").await;
        assert_eq!(reply.status, 201);
    }
}
