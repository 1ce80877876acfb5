//! State shared by the listener and every request reader.

use crate::error::ServerError;
use crate::peer::{Peer, PeerRegistry, PeerWriter};
use crate::server::ServerStats;
use bytes::BytesMut;
use postbird_core::{Dispatcher, ParamEncoding};
use postbird_protocol::{CallFrame, Encoder, PushEvent, TransportKind};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;

/// The operations both transports share: registering and removing peers,
/// dispatching received calls, and broadcasting outgoing ones.
pub struct Hub {
    transport: TransportKind,
    dispatcher: Arc<Dispatcher>,
    peers: PeerRegistry,
    stats: Arc<ServerStats>,
}

impl Hub {
    pub fn new(transport: TransportKind, dispatcher: Arc<Dispatcher>, stats: Arc<ServerStats>) -> Self {
        Self {
            transport,
            dispatcher,
            peers: PeerRegistry::new(),
            stats,
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Adds a freshly accepted connection to the peer registry.
    pub fn register_peer(&self, addr: SocketAddr, writer: PeerWriter) -> Arc<Peer> {
        let peer = self.peers.insert(addr, self.transport, writer);
        tracing::info!("Client connected: {} (peer {})", addr, peer.id());
        peer
    }

    /// Removes a peer whose read loop has ended.
    pub fn remove_peer(&self, id: &str) -> Option<Arc<Peer>> {
        let removed = self.peers.remove(id);
        if let Some(ref peer) = removed {
            tracing::info!("Client disconnected: {} (peer {})", peer.addr(), id);
        }
        removed
    }

    /// Runs a received call on the blocking pool.
    ///
    /// The reader does not wait for the call to finish, so two calls from
    /// the same connection may complete in either order. Raw TCP parameters
    /// must match the handler's types exactly; push-channel arguments are
    /// text and may be read as JSON.
    pub fn dispatch(&self, frame: CallFrame, peer_id: &str, tasks: &mut JoinSet<()>) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "[{}] Call: {} ({} params)",
            peer_id,
            frame.function_name,
            frame.params.len()
        );

        let dispatcher = self.dispatcher.clone();
        let stats = self.stats.clone();
        let peer_id = peer_id.to_string();
        let encoding = ParamEncoding::for_transport(self.transport);
        tasks.spawn_blocking(move || {
            let name = frame.function_name.clone();
            match dispatcher.invoke_frame_with(frame, encoding) {
                Ok(result) => {
                    stats.calls_succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("[{}] {} returned {}", peer_id, name, result);
                }
                Err(e) => {
                    stats.calls_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("[{}] Call to '{}' failed ({}): {}", peer_id, name, e.code(), e);
                }
            }
        });
    }

    /// Encodes an outgoing call for this hub's transport.
    pub fn encode_call(&self, frame: &CallFrame) -> Result<BytesMut, ServerError> {
        let bytes = match self.transport {
            TransportKind::RawTcp => Encoder::encode_frame(frame)?,
            TransportKind::PushChannel => Encoder::encode_event(&PushEvent::from(frame))?,
        };
        Ok(bytes)
    }

    /// Writes `frame` to every connected peer.
    ///
    /// Returns how many peers were written successfully. With no peers this
    /// performs no writes and returns zero. Peers are written concurrently,
    /// so one that stops reading only delays its own write, and that write
    /// ends when the peer is closed. A failed write is logged and the
    /// remaining peers are still counted.
    pub async fn broadcast(&self, frame: &CallFrame) -> Result<usize, ServerError> {
        let peers = self.peers.snapshot();
        if peers.is_empty() {
            tracing::debug!("Broadcast of '{}' skipped: no peers", frame.function_name);
            return Ok(0);
        }

        let bytes = self.encode_call(frame)?.freeze();
        let mut sends = JoinSet::new();
        for peer in peers {
            let bytes = bytes.clone();
            sends.spawn(async move {
                let result = peer.send(&bytes).await;
                (peer, result)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((peer, Err(e))) => tracing::warn!(
                    "[{}] Broadcast of '{}' failed: {}",
                    peer.id(),
                    frame.function_name,
                    e
                ),
                Err(e) => tracing::error!("Broadcast task failed: {}", e),
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Broadcast '{}' to {} peer(s)",
            frame.function_name,
            delivered
        );
        Ok(delivered)
    }
}

/// Logs the outcome of a finished dispatch task.
pub(crate) fn log_dispatch_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("Handler panicked: {}", e);
        } else {
            tracing::debug!("Dispatch task cancelled: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbird_core::FunctionRegistry;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    fn hub(transport: TransportKind) -> Hub {
        let registry = FunctionRegistry::new()
            .with("add", |a: i64, b: i64| a + b)
            .with("inc", |a: i64| a + 1);
        Hub::new(
            transport,
            Arc::new(Dispatcher::new(registry)),
            Arc::new(ServerStats::default()),
        )
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[tokio::test]
    async fn test_broadcast_without_peers() {
        let hub = hub(TransportKind::RawTcp);
        let delivered = hub.broadcast(&CallFrame::new("tick")).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(hub.stats.broadcasts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let hub = hub(TransportKind::RawTcp);
        let (mut a_rx, a_tx) = tokio::io::duplex(1024);
        let (mut b_rx, b_tx) = tokio::io::duplex(1024);
        hub.register_peer(addr(), Box::new(a_tx));
        hub.register_peer(addr(), Box::new(b_tx));

        let frame = CallFrame::new("add").arg(1).arg(2);
        assert_eq!(hub.broadcast(&frame).await.unwrap(), 2);

        let expected = Encoder::encode_frame(&frame).unwrap();
        for rx in [&mut a_rx, &mut b_rx] {
            let mut buf = vec![0u8; expected.len()];
            rx.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf[..], &expected[..]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_peer() {
        let hub = hub(TransportKind::PushChannel);
        let (_a_rx, a_tx) = tokio::io::duplex(1024);
        let (mut b_rx, b_tx) = tokio::io::duplex(1024);
        let a = hub.register_peer(addr(), Box::new(a_tx));
        hub.register_peer(addr(), Box::new(b_tx));
        a.close().await;

        let frame = CallFrame::new("echo").arg("hi");
        assert_eq!(hub.broadcast(&frame).await.unwrap(), 1);

        let expected = Encoder::encode_event(&PushEvent::call("echo", vec!["hi".into()])).unwrap();
        let mut buf = vec![0u8; expected.len()];
        b_rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_dispatch_records_outcomes() {
        let hub = hub(TransportKind::RawTcp);
        let mut tasks = JoinSet::new();
        hub.dispatch(CallFrame::new("add").arg(1).arg(2), "p", &mut tasks);
        hub.dispatch(CallFrame::new("add").arg(1), "p", &mut tasks);
        hub.dispatch(CallFrame::new("nope"), "p", &mut tasks);
        hub.dispatch(
            CallFrame::new("add").with_params(vec![json!("x"), json!(2)]),
            "p",
            &mut tasks,
        );
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert_eq!(hub.stats.frames_received.load(Ordering::Relaxed), 4);
        assert_eq!(hub.stats.calls_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(hub.stats.calls_failed.load(Ordering::Relaxed), 3);
    }

    async fn dispatch_all(hub: &Hub, frames: Vec<CallFrame>) {
        let mut tasks = JoinSet::new();
        for frame in frames {
            hub.dispatch(frame, "p", &mut tasks);
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
    }

    #[tokio::test]
    async fn test_raw_tcp_does_not_coerce_numeric_strings() {
        let hub = hub(TransportKind::RawTcp);
        dispatch_all(&hub, vec![CallFrame::new("inc").arg("41")]).await;
        assert_eq!(hub.stats.calls_succeeded.load(Ordering::Relaxed), 0);
        assert_eq!(hub.stats.calls_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_push_channel_reads_numeric_strings() {
        let hub = hub(TransportKind::PushChannel);
        dispatch_all(&hub, vec![CallFrame::new("inc").arg("41")]).await;
        assert_eq!(hub.stats.calls_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(hub.stats.calls_failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_hold_up_others() {
        let hub = hub(TransportKind::RawTcp);
        // Nobody reads `stalled`, so its tiny buffer fills on the first write.
        let (_stalled_rx, stalled_tx) = tokio::io::duplex(8);
        let (mut live_rx, live_tx) = tokio::io::duplex(4096);
        let stalled = hub.register_peer(addr(), Box::new(stalled_tx));
        hub.register_peer(addr(), Box::new(live_tx));

        let frame = CallFrame::new("add").arg(1).arg(2);
        let expected = Encoder::encode_frame(&frame).unwrap();
        let (delivered, _) = tokio::join!(hub.broadcast(&frame), async {
            let mut buf = vec![0u8; expected.len()];
            live_rx.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf[..], &expected[..]);
            stalled.close().await;
        });
        assert_eq!(delivered.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let hub = hub(TransportKind::RawTcp);
        let peer = hub.register_peer(addr(), Box::new(tokio::io::sink()));
        assert_eq!(hub.peers().len(), 1);
        assert!(hub.remove_peer(peer.id()).is_some());
        assert!(hub.remove_peer(peer.id()).is_none());
        assert!(hub.peers().is_empty());
    }
}
