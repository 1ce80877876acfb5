//! # postbird-protocol
//!
//! Wire protocol implementation for postbird.
//!
//! This crate provides:
//! - The [`CallFrame`] record exchanged on the raw TCP transport
//! - A stream codec for self-delimiting JSON records (no length prefix)
//! - Push-channel events and their line-delimited JSON codec
//! - Protocol errors and constants

pub mod codec;
pub mod error;
pub mod event;
pub mod frame;

pub use codec::{Decoder, Encoder, EventDecoder};
pub use error::ProtocolError;
pub use event::PushEvent;
pub use frame::{CallFrame, TransportKind};

/// Default port for both the listener and the remote endpoint.
pub const DEFAULT_PORT: u16 = 8787;

/// Default bind address for the listener.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default remote address for clients.
pub const DEFAULT_REMOTE_ADDRESS: &str = "127.0.0.1";

/// Maximum size of a single buffered record (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
