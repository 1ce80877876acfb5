//! Connection management.

use crate::error::ClientError;
use parking_lot::Mutex as SyncMutex;
use postbird_core::{Config, Dispatcher, ParamEncoding};
use postbird_protocol::{
    CallFrame, Decoder, Encoder, EventDecoder, ProtocolError, PushEvent, TransportKind,
    MAX_FRAME_SIZE,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server `host:port`.
    pub remote_addr: String,
    /// Transport the server speaks.
    pub transport: TransportKind,
    /// Largest record accepted from the server.
    pub max_frame_bytes: usize,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ClientConfig {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            transport: TransportKind::default(),
            max_frame_bytes: MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
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

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        Self::new(config.network.remote_endpoint())
            .with_transport(config.transport)
            .with_max_frame_bytes(config.limits.max_frame_bytes)
            .with_read_buffer_size(config.limits.read_buffer_size)
    }
}

/// Something the server sent.
#[derive(Debug)]
enum Inbound {
    Call(CallFrame),
    Welcome(String),
    Disconnect,
}

/// Decoder for whichever transport the connection speaks.
enum InboundDecoder {
    Frames(Decoder),
    Events(EventDecoder),
}

impl InboundDecoder {
    fn new(transport: TransportKind, max_frame_bytes: usize) -> Self {
        match transport {
            TransportKind::RawTcp => {
                Self::Frames(Decoder::new().with_max_frame_size(max_frame_bytes))
            }
            TransportKind::PushChannel => {
                Self::Events(EventDecoder::new().with_max_line(max_frame_bytes))
            }
        }
    }

    fn extend(&mut self, data: &[u8]) {
        match self {
            Self::Frames(d) => d.extend(data),
            Self::Events(d) => d.extend(data),
        }
    }

    fn has_partial(&self) -> bool {
        match self {
            Self::Frames(d) => d.has_partial(),
            Self::Events(d) => d.has_partial(),
        }
    }

    fn buffered(&self) -> usize {
        match self {
            Self::Frames(d) => d.buffered(),
            Self::Events(d) => d.buffered(),
        }
    }

    fn next(&mut self) -> Result<Option<Inbound>, ProtocolError> {
        match self {
            Self::Frames(d) => Ok(d.decode_frame()?.map(Inbound::Call)),
            Self::Events(d) => loop {
                let Some(event) = d.decode_event()? else {
                    return Ok(None);
                };
                match event {
                    PushEvent::Connect { id } => return Ok(Some(Inbound::Welcome(id))),
                    PushEvent::Disconnect => return Ok(Some(Inbound::Disconnect)),
                    call @ PushEvent::Call { .. } => {
                        if let Some(frame) = call.into_call_frame() {
                            return Ok(Some(Inbound::Call(frame)));
                        }
                    }
                }
            },
        }
    }
}

/// A connection to a postbird server.
pub struct Connection {
    config: ClientConfig,
    /// Write half of the stream (for sending calls).
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half plus any bytes buffered during the handshake. Taken by `read_loop`.
    read_side: SyncMutex<Option<(OwnedReadHalf, InboundDecoder)>>,
    session_id: SyncMutex<Option<String>>,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ClientConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            config,
            writer: Mutex::new(None),
            read_side: SyncMutex::new(None),
            session_id: SyncMutex::new(None),
            connected: AtomicBool::new(false),
            closed,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects to the server.
    ///
    /// On failure the connection stays disconnected; there is no retry.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            tracing::debug!("connect() called while already connected");
            return Ok(());
        }
        tracing::debug!("Connecting to {}...", self.config.remote_addr);

        let tcp_stream = TcpStream::connect(&self.config.remote_addr)
            .await
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;
        tcp_stream.set_nodelay(true).ok();

        let (mut reader, writer) = tcp_stream.into_split();
        let mut decoder = InboundDecoder::new(self.config.transport, self.config.max_frame_bytes);

        let session_id = match self.config.transport {
            TransportKind::RawTcp => None,
            TransportKind::PushChannel => {
                tracing::debug!("Waiting for connect event...");
                Some(self.read_welcome(&mut reader, &mut decoder).await?)
            }
        };

        *self.writer.lock().await = Some(writer);
        *self.read_side.lock() = Some((reader, decoder));
        *self.session_id.lock() = session_id;
        self.closed.send_replace(false);
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!(
            "Connected to {} ({})",
            self.config.remote_addr,
            self.config.transport
        );
        Ok(())
    }

    /// Reads the server's `connect` event, which must be the first thing sent.
    async fn read_welcome(
        &self,
        reader: &mut OwnedReadHalf,
        decoder: &mut InboundDecoder,
    ) -> Result<String, ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            if let Some(inbound) = decoder.next()? {
                return match inbound {
                    Inbound::Welcome(id) => {
                        tracing::debug!("Session id {}", id);
                        Ok(id)
                    }
                    other => Err(ClientError::Handshake(format!(
                        "expected connect event, got {:?}",
                        other
                    ))),
                };
            }

            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            decoder.extend(&buf[..n]);
        }
    }

    /// Writes one call to the server.
    pub async fn send(&self, frame: &CallFrame) -> Result<(), ClientError> {
        if !self.is_connected() {
            tracing::debug!("send() called but not connected");
            return Err(ClientError::NotConnected);
        }

        let encoded = match self.config.transport {
            TransportKind::RawTcp => Encoder::encode_frame(frame)?,
            TransportKind::PushChannel => Encoder::encode_event(&PushEvent::from(frame))?,
        };

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        tracing::debug!(
            "Sent call {} ({} bytes)",
            frame.function_name,
            encoded.len()
        );
        Ok(())
    }

    /// Reads calls pushed by the server and dispatches them locally.
    ///
    /// Runs until the connection is closed from either side. A local
    /// [`close`](Self::close) ends it with `Ok(())`; the server going away
    /// ends it with `ConnectionClosed`, and undecodable input with a
    /// protocol error. Can run once per successful `connect`.
    pub async fn read_loop(&self, dispatcher: Arc<Dispatcher>) -> Result<(), ClientError> {
        let encoding = ParamEncoding::for_transport(self.config.transport);
        self.run_reader(|frame, tasks| dispatch(&dispatcher, frame, encoding, tasks))
            .await
    }

    /// Like [`read_loop`](Self::read_loop), but hands each call to `on_call`
    /// instead of a dispatcher.
    pub async fn read_calls<F>(&self, mut on_call: F) -> Result<(), ClientError>
    where
        F: FnMut(CallFrame),
    {
        self.run_reader(|frame, _| on_call(frame)).await
    }

    async fn run_reader<F>(&self, mut on_call: F) -> Result<(), ClientError>
    where
        F: FnMut(CallFrame, &mut JoinSet<()>),
    {
        let (mut reader, mut decoder) = self
            .read_side
            .lock()
            .take()
            .ok_or(ClientError::NotConnected)?;
        let mut closed = self.closed.subscribe();
        let mut tasks = JoinSet::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        tracing::debug!("read_loop started");
        let result = loop {
            match decoder.next() {
                Ok(Some(Inbound::Call(frame))) => {
                    on_call(frame, &mut tasks);
                    continue;
                }
                Ok(Some(Inbound::Welcome(id))) => {
                    tracing::warn!("read_loop: ignoring repeated connect event ({})", id);
                    continue;
                }
                Ok(Some(Inbound::Disconnect)) => {
                    tracing::debug!("read_loop: server sent disconnect");
                    break Err(ClientError::ConnectionClosed);
                }
                Ok(None) => {}
                Err(e) => break Err(e.into()),
            }

            let n = tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(n) => n,
                    Err(e) => break Err(ClientError::Io(e)),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(joined);
                    continue;
                }
                _ = wait_for_close(&mut closed) => {
                    tracing::debug!("read_loop: closed locally");
                    break Ok(());
                }
            };

            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                if decoder.has_partial() {
                    break Err(ProtocolError::Truncated(decoder.buffered()).into());
                }
                break Err(ClientError::ConnectionClosed);
            }
            decoder.extend(&buf[..n]);
        };

        self.connected.store(false, Ordering::SeqCst);
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        tracing::debug!("read_loop finished");
        result
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the identifier the server assigned (push channel only).
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            if was_connected && self.config.transport == TransportKind::PushChannel {
                let bye = Encoder::encode_event(&PushEvent::Disconnect)?;
                if let Err(e) = writer.write_all(&bye).await {
                    tracing::debug!("Failed to send disconnect event: {}", e);
                }
            }
            let _ = writer.shutdown().await;
        }

        self.closed.send_replace(true);
        let _ = self.read_side.lock().take();
        *self.session_id.lock() = None;

        tracing::debug!("Connection closed");
        Ok(())
    }
}

fn dispatch(
    dispatcher: &Arc<Dispatcher>,
    frame: CallFrame,
    encoding: ParamEncoding,
    tasks: &mut JoinSet<()>,
) {
    tracing::debug!(
        "read_loop: call {} ({} params)",
        frame.function_name,
        frame.params.len()
    );
    let dispatcher = dispatcher.clone();
    tasks.spawn_blocking(move || {
        let name = frame.function_name.clone();
        match dispatcher.invoke_frame_with(frame, encoding) {
            Ok(result) => tracing::debug!("{} returned {}", name, result),
            Err(e) => tracing::warn!("Call to '{}' failed ({}): {}", name, e.code(), e),
        }
    });
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Handler task failed: {}", e);
    }
}

async fn wait_for_close(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
