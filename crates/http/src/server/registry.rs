use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug)]
struct Worker {
    peer_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    abort: Option<AbortHandle>,
}

/// The live connection workers of a server.
///
/// Workers register when they start and deregister when their [`Registration`] drops, which
/// happens on every exit path including an abort.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    workers: Mutex<HashMap<u64, Worker>>,
    next_id: AtomicU64,
    changed: Notify,
}

/// Membership of one worker in the registry.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: u64,
    cancel: CancellationToken,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancelled when shutdown wants the worker to drop its transport.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.workers().remove(&self.id);
        trace!(connection_id = self.id, "worker deregistered");
        self.registry.changed.notify_waiters();
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<u64, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(self: &Arc<Self>, peer_addr: Option<SocketAddr>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.workers().insert(id, Worker { peer_addr, cancel: cancel.clone(), abort: None });
        self.changed.notify_waiters();
        Registration { registry: Arc::clone(self), id, cancel }
    }

    /// Records the task running worker `id` so shutdown can interrupt it.
    pub fn attach(&self, id: u64, abort: AbortHandle) {
        if let Some(worker) = self.workers().get_mut(&id) {
            worker.abort = Some(abort);
        }
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers().is_empty()
    }

    /// Peer addresses of the registered workers.
    pub fn peers(&self) -> Vec<(u64, Option<SocketAddr>)> {
        self.workers().iter().map(|(id, worker)| (*id, worker.peer_addr)).collect()
    }

    /// Waits until every worker deregistered, at most `timeout`. Returns true if it emptied.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Closes the transport of every registered worker and aborts its task. Returns how many
    /// workers were terminated.
    pub fn terminate_all(&self) -> usize {
        let snapshot: Vec<(CancellationToken, Option<AbortHandle>)> =
            self.workers().values().map(|worker| (worker.cancel.clone(), worker.abort.clone())).collect();

        for (cancel, abort) in &snapshot {
            cancel.cancel();
            if let Some(abort) = abort {
                abort.abort();
            }
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registration_lifecycle() {
        let registry = Arc::new(ConnectionRegistry::new());
        let first = registry.register(None);
        let second = registry.register("127.0.0.1:1".parse().ok());

        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);
        assert!(!registry.wait_until_empty(Duration::from_millis(10)).await);

        drop(first);
        assert_eq!(registry.peers(), vec![(second.id(), "127.0.0.1:1".parse().ok())]);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_until_empty(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        drop(second);
        assert!(waiter.await.unwrap());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn terminate_cancels_and_aborts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let registration = registry.register(None);
        let id = registration.id();
        let token = registration.cancel_token();

        let task = tokio::spawn(async move {
            let _registration = registration;
            std::future::pending::<()>().await;
        });
        registry.attach(id, task.abort_handle());

        assert_eq!(registry.terminate_all(), 1);
        assert!(token.is_cancelled());
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(registry.is_empty());
    }
}
