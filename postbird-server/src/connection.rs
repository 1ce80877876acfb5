//! Per-connection request readers.
//!
//! A reader is `Reading` while it waits on the socket, hands every complete
//! record to the hub without waiting for the call to finish, and is `Closed`
//! for good on EOF, a decode failure, or shutdown. There is no reconnect.

use crate::error::ServerError;
use crate::hub::{log_dispatch_join, Hub};
use crate::peer::Peer;
use crate::server::wait_for_shutdown;
use postbird_protocol::{Decoder, Encoder, EventDecoder, ProtocolError, PushEvent, TransportKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Read-side limits for one connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadLimits {
    pub max_frame_bytes: usize,
    pub read_buffer_size: usize,
}

/// Serves one accepted connection until it closes.
///
/// The peer is registered before the first read and removed, with its
/// connection closed, before this returns. Outstanding calls are awaited.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    limits: ReadLimits,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    stream.set_nodelay(true).ok();
    let (reader, writer) = stream.into_split();
    let peer = hub.register_peer(addr, Box::new(writer));
    let mut tasks = JoinSet::new();

    let result = match hub.transport() {
        TransportKind::RawTcp => {
            read_frames(reader, &peer, &hub, limits, &mut tasks, &mut shutdown).await
        }
        TransportKind::PushChannel => {
            read_events(reader, &peer, &hub, limits, &mut tasks, &mut shutdown).await
        }
    };

    hub.remove_peer(peer.id());
    peer.close().await;

    while let Some(joined) = tasks.join_next().await {
        log_dispatch_join(joined);
    }

    result
}

/// Waits for the next chunk of bytes, reaping finished calls meanwhile.
///
/// Returns `Ok(None)` on shutdown and `Ok(Some(0))` on EOF.
async fn next_chunk(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    tasks: &mut JoinSet<()>,
    shutdown: &mut watch::Receiver<bool>,
    peer: &Peer,
) -> Result<Option<usize>, ServerError> {
    loop {
        tokio::select! {
            result = reader.read(buf) => {
                return match result {
                    Ok(n) => Ok(Some(n)),
                    Err(e) => {
                        tracing::debug!("[{}] Read error: {}", peer.id(), e);
                        Err(ServerError::Io(e))
                    }
                };
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                log_dispatch_join(joined);
            }
            _ = wait_for_shutdown(shutdown) => {
                tracing::debug!("[{}] Shutdown signal received", peer.id());
                return Ok(None);
            }
        }
    }
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    peer: &Peer,
    hub: &Hub,
    limits: ReadLimits,
    tasks: &mut JoinSet<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let mut decoder = Decoder::new().with_max_frame_size(limits.max_frame_bytes);
    let mut buf = vec![0u8; limits.read_buffer_size];

    loop {
        match next_chunk(&mut reader, &mut buf, tasks, shutdown, peer).await? {
            None => return Ok(()),
            Some(0) => {
                if decoder.has_partial() {
                    return Err(ProtocolError::Truncated(decoder.buffered()).into());
                }
                tracing::debug!("[{}] Connection closed by client", peer.id());
                return Ok(());
            }
            Some(n) => {
                tracing::debug!("[{}] Received {} bytes", peer.id(), n);
                decoder.extend(&buf[..n]);
            }
        }

        while let Some(frame) = decoder.decode_frame()? {
            hub.dispatch(frame, peer.id(), tasks);
        }
    }
}

async fn read_events(
    mut reader: OwnedReadHalf,
    peer: &Peer,
    hub: &Hub,
    limits: ReadLimits,
    tasks: &mut JoinSet<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let welcome = Encoder::encode_event(&PushEvent::Connect {
        id: peer.id().to_string(),
    })?;
    peer.send(&welcome).await?;

    let mut decoder = EventDecoder::new().with_max_line(limits.max_frame_bytes);
    let mut buf = vec![0u8; limits.read_buffer_size];

    loop {
        match next_chunk(&mut reader, &mut buf, tasks, shutdown, peer).await? {
            None => return Ok(()),
            Some(0) => {
                if decoder.has_partial() {
                    return Err(ProtocolError::Truncated(decoder.buffered()).into());
                }
                tracing::debug!("[{}] Connection closed by client", peer.id());
                return Ok(());
            }
            Some(n) => decoder.extend(&buf[..n]),
        }

        while let Some(event) = decoder.decode_event()? {
            match event {
                PushEvent::Call { .. } => {
                    if let Some(frame) = event.into_call_frame() {
                        hub.dispatch(frame, peer.id(), tasks);
                    }
                }
                PushEvent::Disconnect => {
                    tracing::debug!("[{}] Disconnect event", peer.id());
                    return Ok(());
                }
                PushEvent::Connect { .. } => {
                    tracing::warn!("[{}] Ignoring connect event from client", peer.id());
                }
            }
        }
    }
}
