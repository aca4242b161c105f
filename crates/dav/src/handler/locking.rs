use std::time::Instant;

use http::StatusCode;
use http::header::HeaderName;
use loom_http::connection::Exchange;
use tracing::{debug, info};

use super::dav::{Change, DavHandler};
use super::{DavRequest, header_value, respond_status, respond_xml};
use crate::error::DavError;
use crate::headers::{self, Depth};
use crate::lock::{Lock, LockDepth, LockError, LockRequest, LockTimeout};
use crate::xml;

impl DavHandler {
    pub(super) async fn lock(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let path = request.path.as_str();
        let depth = match Depth::parse(exchange.header("Depth"), Depth::Infinity)? {
            Depth::Zero => LockDepth::Zero,
            Depth::Infinity => LockDepth::Infinity,
            Depth::One => return Err(DavError::bad_request("locks have Depth 0 or infinity")),
        };
        let timeouts = exchange.header("Timeout").map(LockTimeout::parse_header).unwrap_or_default();

        let Some(document) = self.read_xml(exchange).await? else {
            return self.refresh(exchange, request, &timeouts).await;
        };
        let info = xml::parse_lockinfo(&document)?;

        let existing = self.adapter().metadata(path).await?;
        if existing.is_none() {
            self.ensure_parent(path).await?;
            self.check_write(request, path, Change::Create).await?;
        } else {
            let state = self.state_of(path).await?;
            if !request.conditions.evaluate(path, true, &state, None) {
                return Err(DavError::precondition_failed(format!("If header does not hold for {path}")));
            }
        }

        let lock_request = LockRequest { scope: info.scope, depth, owner: info.owner, timeouts };
        let lock = self.locks().create_lock(&lock_request, &self.config().lock_policy)?;
        let created = match self.attach(&lock, path, existing.is_none()).await {
            Ok(created) => created,
            Err(e) => {
                if let Err(cause) = self.locks().unlock_resources(&lock.token) {
                    debug!(path, token = lock.token, cause = %cause, "dropping an unattached lock failed");
                }
                return Err(e);
            }
        };
        let lock = self.locks().find_lock(&lock.token).ok_or(LockError::NotFound)?;
        info!(path, token = lock.token, scope = ?lock.scope, depth = %lock.depth, timeout = %lock.timeout, "locked");

        exchange.set_header(HeaderName::from_static("lock-token"), header_value(&format!("<{}>", lock.token))?)?;
        let status = if created { StatusCode::CREATED } else { StatusCode::OK };
        respond_xml(exchange, status, xml::lock_response(&lock, &request.mount, Instant::now())?).await
    }

    /// Attaches `lock` to `path`, first creating an empty file there if nothing exists yet.
    async fn attach(&self, lock: &Lock, path: &str, create: bool) -> Result<bool, DavError> {
        self.locks().lock_resource(&lock.token, path)?;
        if create {
            return self.adapter().create_file(path).await;
        }
        Ok(false)
    }

    /// A `LOCK` without a body restarts the timeout of a submitted lock protecting the target.
    async fn refresh(&self, exchange: &mut Exchange, request: &DavRequest, timeouts: &[LockTimeout]) -> Result<(), DavError> {
        let path = request.path.as_str();
        let token = request
            .conditions
            .tokens()
            .iter()
            .find(|token| self.locks().find_lock(token).is_some_and(|lock| lock.covers(path)))
            .ok_or_else(|| DavError::precondition_failed(format!("no submitted lock protects {path}")))?;

        let lock = self.locks().refresh_lock(token, timeouts, &self.config().lock_policy)?;
        debug!(path, token, timeout = %lock.timeout, "lock refreshed");
        respond_xml(exchange, StatusCode::OK, xml::lock_response(&lock, &request.mount, Instant::now())?).await
    }

    pub(super) async fn unlock(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let path = request.path.as_str();
        let token = exchange
            .header("Lock-Token")
            .and_then(headers::parse_lock_token)
            .ok_or_else(|| DavError::bad_request("missing Lock-Token"))?
            .to_owned();

        let lock = self.locks().find_lock(&token).ok_or(LockError::NotFound)?;
        let mut tokens = request.conditions.tokens().to_vec();
        tokens.push(token.clone());
        if !self.locks().is_access_allowed(path, &tokens) {
            debug!(path, token, "target is held by another lock");
            return Err(DavError::Locked);
        }
        if !lock.covers(path) {
            return Err(DavError::conflict(format!("{token} does not protect {path}")));
        }
        self.locks().unlock_resources(&token)?;
        info!(path, token, "unlocked");
        respond_status(exchange, StatusCode::NO_CONTENT).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indoc::indoc;
    use loom_http::handler::Handler;

    use super::*;
    use crate::adapter::{MemoryResourceAdapter, ResourceAdapter};
    use crate::handler::DavConfig;
    use crate::handler::testing::{Reply, send};
    use crate::lock::LockPolicy;

    const EXCLUSIVE: &str = indoc! {r#"
        <?xml version="1.0" encoding="utf-8"?>
        <D:lockinfo xmlns:D="DAV:">
          <D:lockscope><D:exclusive/></D:lockscope>
          <D:locktype><D:write/></D:locktype>
          <D:owner>someone</D:owner>
        </D:lockinfo>
    "#};

    fn handler(config: DavConfig) -> (Arc<dyn Handler>, Arc<MemoryResourceAdapter>) {
        let adapter = Arc::new(MemoryResourceAdapter::new());
        let handler: Arc<dyn Handler> = Arc::new(DavHandler::new(Arc::clone(&adapter) as Arc<dyn ResourceAdapter>, config));
        (handler, adapter)
    }

    fn token(reply: &Reply) -> String {
        headers::parse_lock_token(reply.header("lock-token").unwrap()).unwrap().to_owned()
    }

    #[tokio::test]
    async fn lock_creates_and_protects() {
        let (handler, adapter) = handler(DavConfig::default());
        let reply = send(Arc::clone(&handler), "LOCK", "/f", &[("Timeout", "Second-600")], EXCLUSIVE).await;
        assert_eq!(reply.status, 201);
        let token = token(&reply);
        assert!(token.starts_with("opaquelocktoken:"));
        assert!(reply.body.contains(&token));
        assert!(reply.body.contains("someone"));
        assert!(adapter.metadata("/f").await.unwrap().is_some_and(|meta| meta.length == 0));

        assert_eq!(send(Arc::clone(&handler), "LOCK", "/f", &[], EXCLUSIVE).await.status, 423);
        assert_eq!(send(Arc::clone(&handler), "PUT", "/f", &[], "data").await.status, 423);

        let submitted = format!("(<{token}>)");
        assert_eq!(send(handler, "PUT", "/f", &[("If", submitted.as_str())], "data").await.status, 204);
    }

    #[tokio::test]
    async fn lock_refusals() {
        let policy = LockPolicy { allow_infinite: false, ..LockPolicy::default() };
        let (handler, _) = handler(DavConfig::default().with_lock_policy(policy));
        assert_eq!(send(Arc::clone(&handler), "LOCK", "/f", &[("Depth", "1")], EXCLUSIVE).await.status, 400);
        assert_eq!(send(Arc::clone(&handler), "LOCK", "/f", &[("Timeout", "Infinite")], EXCLUSIVE).await.status, 412);
        assert_eq!(send(Arc::clone(&handler), "LOCK", "/a/f", &[], EXCLUSIVE).await.status, 409);
        assert_eq!(send(handler, "LOCK", "/f", &[], "").await.status, 412);
    }

    #[tokio::test]
    async fn lock_null_respects_the_parent_lock() {
        let (handler, adapter) = handler(DavConfig::default());
        adapter.create_collection("/c").await.unwrap();
        let parent = token(&send(Arc::clone(&handler), "LOCK", "/c", &[("Depth", "0")], EXCLUSIVE).await);

        assert_eq!(send(Arc::clone(&handler), "LOCK", "/c/f", &[], EXCLUSIVE).await.status, 423);
        assert!(adapter.metadata("/c/f").await.unwrap().is_none());
        assert!(adapter.lock_manager().get_locks("/c/f").is_empty());

        let submitted = format!("(<{parent}>)");
        assert_eq!(send(handler, "LOCK", "/c/f", &[("If", submitted.as_str())], EXCLUSIVE).await.status, 201);
        assert!(adapter.metadata("/c/f").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refresh_restarts_the_timeout() {
        let (handler, _) = handler(DavConfig::default());
        let reply = send(Arc::clone(&handler), "LOCK", "/f", &[("Timeout", "Second-60")], EXCLUSIVE).await;
        let token = token(&reply);

        let submitted = format!("(<{token}>)");
        let refreshed = send(handler, "LOCK", "/f", &[("If", submitted.as_str()), ("Timeout", "Infinite")], "").await;
        assert_eq!(refreshed.status, 200);
        assert!(refreshed.header("lock-token").is_none());
        assert!(refreshed.body.contains("Infinite"));
    }

    #[tokio::test]
    async fn unlock() {
        let (handler, adapter) = handler(DavConfig::default());
        adapter.create_collection("/c").await.unwrap();
        let reply = send(Arc::clone(&handler), "LOCK", "/c/f", &[], EXCLUSIVE).await;
        let token = token(&reply);
        let header = format!("<{token}>");

        assert_eq!(send(Arc::clone(&handler), "UNLOCK", "/c/f", &[], "").await.status, 400);
        assert_eq!(send(Arc::clone(&handler), "UNLOCK", "/c/f", &[("Lock-Token", "<opaquelocktoken:unknown>")], "").await.status, 412);
        assert_eq!(send(Arc::clone(&handler), "UNLOCK", "/c", &[("Lock-Token", header.as_str())], "").await.status, 409);

        let other = self::token(&send(Arc::clone(&handler), "LOCK", "/c/g", &[], EXCLUSIVE).await);
        let other_header = format!("<{other}>");
        assert_eq!(send(Arc::clone(&handler), "UNLOCK", "/c/f", &[("Lock-Token", other_header.as_str())], "").await.status, 423);
        assert_eq!(send(Arc::clone(&handler), "UNLOCK", "/c/f", &[("Lock-Token", header.as_str())], "").await.status, 204);

        assert!(!adapter.lock_manager().is_locked("/c/f"));
        assert_eq!(send(handler, "PUT", "/c/f", &[], "data").await.status, 204);
    }
}
