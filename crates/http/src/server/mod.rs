//! The concurrent connection server.
//!
//! One acceptor task accepts connections and hands each one to its own worker task, at most
//! [`ServerConfig::workers`] at a time. Every worker registers in a [`ConnectionRegistry`] for
//! its whole lifetime. [`ServerHandle::shutdown`] stops the acceptor, gives the workers a grace
//! period to finish and then closes whatever is left.

mod config;
mod registry;

pub use config::ServerConfig;
pub use registry::{ConnectionRegistry, Registration};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ExchangeConfig, HttpConnection};
use crate::date::{DATE_UPDATE_INTERVAL, DateService};
use crate::handler::{DefaultErrorHandler, ErrorHandler, Handler};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("handler must be set")]
    MissingHandler,
}

pub struct ServerBuilder {
    config: ServerConfig,
    handler: Option<Arc<dyn Handler>>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), handler: None, error_handler: Arc::new(DefaultErrorHandler) }
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.config.address = address;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    #[must_use]
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let handler = self.handler.ok_or(ServerError::MissingHandler)?;
        Ok(Server { config: self.config, handler, error_handler: self.error_handler })
    }
}

pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish_non_exhaustive()
    }
}

/// What every worker of one server shares.
struct ServerContext {
    exchange_config: ExchangeConfig,
    accept_timeout: Duration,
    idle_timeout: Option<Duration>,
    handler: Arc<dyn Handler>,
    error_handler: Arc<dyn ErrorHandler>,
    date: Arc<DateService>,
    registry: Arc<ConnectionRegistry>,
    permits: Arc<Semaphore>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the listener and starts accepting. Binding failures are returned before anything
    /// is served.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let address = self.config.address;
        let listener = TcpListener::bind(address).await.map_err(|source| ServerError::Bind { address, source })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind { address, source })?;
        info!(%local_addr, workers = self.config.workers, "start listening");

        let registry = Arc::new(ConnectionRegistry::new());
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let context = Arc::new(ServerContext {
            exchange_config: self.config.exchange_config(),
            accept_timeout: self.config.accept_timeout,
            idle_timeout: self.config.idle_timeout,
            handler: self.handler,
            error_handler: self.error_handler,
            date: Arc::new(DateService::start(DATE_UPDATE_INTERVAL)),
            registry: Arc::clone(&registry),
            permits: Arc::clone(&permits),
        });

        let stop = CancellationToken::new();
        let acceptor = tokio::spawn(accept_loop(listener, context, stop.clone()));

        Ok(ServerHandle { local_addr, grace_period: self.config.grace_period, registry, permits, stop, acceptor })
    }
}

async fn accept_loop(listener: TcpListener, context: Arc<ServerContext>, stop: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            accepted = tokio::time::timeout(context.accept_timeout, listener.accept()) => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Err(_elapsed) => continue,
            Ok(Err(e)) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
            Ok(Ok(accepted)) => accepted,
        };

        let permit = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            permit = Arc::clone(&context.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => break,
            },
        };

        let connection = match Connection::from_tcp(stream) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(cause = %e, %peer_addr, "failed to set up connection");
                continue;
            }
        };
        spawn_worker(&context, connection, permit);
    }
    info!("acceptor stopped");
}

fn spawn_worker(context: &Arc<ServerContext>, connection: Connection, permit: OwnedSemaphorePermit) {
    let peer_addr = connection.info().peer_addr;
    let registration = context.registry.register(peer_addr);
    let connection_id = registration.id();
    let cancel = registration.cancel_token();
    debug!(connection_id, ?peer_addr, "accepted connection");

    let http_connection = HttpConnection::new(connection, context.exchange_config)
        .with_idle_timeout(context.idle_timeout)
        .with_error_handler(Arc::clone(&context.error_handler))
        .with_date_service(Arc::clone(&context.date));
    let handler = Arc::clone(&context.handler);

    let task = tokio::spawn(async move {
        let _permit = permit;
        let _registration = registration;
        tokio::select! {
            () = cancel.cancelled() => {
                warn!(connection_id, "connection terminated by shutdown");
            }
            result = http_connection.process(handler) => match result {
                Ok(()) => debug!(connection_id, "connection finished"),
                Err(e) if e.is_transport() => debug!(connection_id, cause = %e, "connection ended"),
                Err(e) => warn!(connection_id, cause = %e, "connection finished with error"),
            },
        }
    });
    context.registry.attach(connection_id, task.abort_handle());
}

/// Control over a started server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    grace_period: Duration,
    registry: Arc<ConnectionRegistry>,
    permits: Arc<Semaphore>,
    stop: CancellationToken,
    acceptor: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Stops the server in two phases and returns how many connections had to be closed
    /// forcibly.
    ///
    /// The acceptor is stopped first, then running connections get the grace period to
    /// finish. Connections still running after it have their transport closed and their task
    /// aborted.
    pub async fn shutdown(self) -> usize {
        info!(local_addr = %self.local_addr, "stopping acceptor");
        self.stop.cancel();
        if let Err(e) = self.acceptor.await {
            error!(cause = %e, "acceptor task failed");
        }

        let active = self.registry.len();
        info!(active, grace_period = ?self.grace_period, "waiting for connections to finish");
        if self.registry.wait_until_empty(self.grace_period).await {
            self.permits.close();
            info!("all connections finished");
            return 0;
        }

        let forced = self.registry.terminate_all();
        warn!(forced, "closing connections still running after the grace period");
        self.permits.close();
        if !self.registry.wait_until_empty(Duration::from_secs(1)).await {
            warn!(remaining = self.registry.len(), "connections did not stop in time");
        }
        info!("server stopped");
        forced
    }
}
