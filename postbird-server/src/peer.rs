//! Connected peers.

use crate::error::ServerError;
use crate::server::wait_for_shutdown;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use postbird_core::generate_peer_id;
use postbird_protocol::TransportKind;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// Write side of a peer connection.
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One connected remote party.
///
/// The registry and broadcasters hold `Arc<Peer>` for writing; the request
/// reader that created the peer owns the read side and is the only one that
/// closes it. Closing cancels a write that is still in flight.
pub struct Peer {
    id: String,
    addr: SocketAddr,
    transport: TransportKind,
    connected_at: DateTime<Utc>,
    writer: tokio::sync::Mutex<Option<PeerWriter>>,
    closed: watch::Sender<bool>,
}

impl Peer {
    fn new(id: String, addr: SocketAddr, transport: TransportKind, writer: PeerWriter) -> Self {
        Self {
            id,
            addr,
            transport,
            connected_at: Utc::now(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            closed: watch::channel(false).0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Writes already-encoded bytes to the peer.
    ///
    /// A peer that stops reading makes this wait until [`close`](Self::close)
    /// is called, which fails it with `PeerClosed`. The record may then be
    /// partly written.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ServerError> {
        let mut closed = self.closed.subscribe();
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard
                .as_mut()
                .ok_or_else(|| ServerError::PeerClosed(self.id.clone()))?;
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok::<(), ServerError>(())
        };

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut closed) => Err(ServerError::PeerClosed(self.id.clone())),
            result = write => result,
        }
    }

    /// Shuts down the write side. Later sends fail with `PeerClosed`, and a
    /// send blocked on a full socket gives up.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            addr: self.addr,
            transport: self.transport,
            connected_at: self.connected_at,
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("transport", &self.transport)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Snapshot of a peer's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    pub addr: SocketAddr,
    pub transport: TransportKind,
    pub connected_at: DateTime<Utc>,
}

/// Set of connected peers keyed by identifier.
///
/// Insert, remove and snapshot all go through one lock. Broadcasts take a
/// snapshot and write after the lock is released, so a slow peer never
/// holds up connects or disconnects.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<BTreeMap<String, Arc<Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a peer with a fresh identifier and adds it.
    ///
    /// Generated identifiers can collide; a collision with a live peer draws
    /// a new one rather than evicting that peer.
    pub fn insert(&self, addr: SocketAddr, transport: TransportKind, writer: PeerWriter) -> Arc<Peer> {
        let mut peers = self.peers.lock();
        let mut id = generate_peer_id();
        while peers.contains_key(&id) {
            tracing::warn!("Peer id collision on {}, drawing another", id);
            id = generate_peer_id();
        }
        let peer = Arc::new(Peer::new(id.clone(), addr, transport, writer));
        peers.insert(id, peer.clone());
        peer
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.lock().get(id).cloned()
    }

    /// Returns the peers connected right now.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().values().cloned().collect()
    }

    pub fn info(&self) -> Vec<PeerInfo> {
        self.peers.lock().values().map(|p| p.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
