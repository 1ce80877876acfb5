//! TCP server implementation.

use crate::connection::{handle_connection, ReadLimits};
use crate::error::ServerError;
use crate::hub::Hub;
use crate::peer::PeerInfo;
use parking_lot::Mutex;
use postbird_core::{Config, Dispatcher};
use postbird_protocol::{CallFrame, TransportKind, MAX_FRAME_SIZE};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to bind to.
    pub bind_addr: String,
    /// Transport every connection speaks.
    pub transport: TransportKind,
    /// Largest record a connection may buffer.
    pub max_frame_bytes: usize,
    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            transport: TransportKind::default(),
            max_frame_bytes: MAX_FRAME_SIZE,
            read_buffer_size: 8 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_endpoint(),
            transport: config.transport,
            max_frame_bytes: config.limits.max_frame_bytes,
            read_buffer_size: config.limits.read_buffer_size,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub calls_succeeded: AtomicU64,
    pub calls_failed: AtomicU64,
    pub decode_failures: AtomicU64,
    pub broadcasts: AtomicU64,
}

/// Resolves once `shutdown` is (or already was) set, or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// TCP server for postbird.
///
/// Accepts connections, registers a peer for each, and runs one request
/// reader per connection. A server serves once; after [`shutdown`](Self::shutdown)
/// it stays stopped.
pub struct Server {
    config: ServerConfig,
    hub: Arc<Hub>,
    stats: Arc<ServerStats>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let stats = Arc::new(ServerStats::default());
        let hub = Arc::new(Hub::new(config.transport, dispatcher, stats.clone()));
        Self {
            config,
            hub,
            stats,
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| {
                tracing::error!("Failed to bind {}: {}", self.config.bind_addr, source);
                ServerError::Bind {
                    addr: self.config.bind_addr.clone(),
                    source,
                }
            })?;
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    ///
    /// Returns after shutdown (or a fatal accept error) once every
    /// connection has been closed and its peer removed.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server listening on {} ({})",
            local_addr,
            self.config.transport
        );

        let limits = ReadLimits {
            max_frame_bytes: self.config.max_frame_bytes,
            read_buffer_size: self.config.read_buffer_size.max(1),
        };
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut readers: JoinSet<()> = JoinSet::new();

        let result = loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let hub = self.hub.clone();
                            let stats = self.stats.clone();
                            let conn_shutdown = self.shutdown.subscribe();

                            readers.spawn(async move {
                                let result =
                                    handle_connection(tcp_stream, addr, hub, limits, conn_shutdown)
                                        .await;

                                if let Err(e) = result {
                                    if e.is_decode_failure() {
                                        stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                                        tracing::warn!("[{}] Dropping connection: {}", addr, e);
                                    } else {
                                        tracing::debug!("Connection {} error: {}", addr, e);
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error, stopping listener: {}", e);
                            break Err(ServerError::Accept(e));
                        }
                    }
                }
                Some(joined) = readers.join_next(), if !readers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    tracing::info!("Server shutting down");
                    break Ok(());
                }
            }
        };

        drop(listener);
        self.shutdown.send_replace(true);
        let open = readers.len();
        if open > 0 {
            tracing::info!("Waiting for {} connection(s) to close", open);
        }
        while let Some(joined) = readers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Server stopped");
        result
    }

    /// Calls `function_name` on every connected peer.
    ///
    /// Returns the number of peers written to; zero when none are connected.
    pub async fn call(&self, function_name: &str, params: Vec<Value>) -> Result<usize, ServerError> {
        let frame = CallFrame::new(function_name).with_params(params);
        self.hub.broadcast(&frame).await
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the bound address once serving has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Returns the connected peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.hub.peers().info()
    }

    pub fn peer_count(&self) -> usize {
        self.hub.peers().len()
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}
