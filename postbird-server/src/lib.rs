//! # postbird-server
//!
//! TCP server for postbird.
//!
//! This crate provides:
//! - The connection listener and one request reader task per peer
//! - A locked peer registry used for broadcasts
//! - Raw TCP (back-to-back JSON records) and push-channel (line events) transports
//! - Orderly shutdown that closes every connection before returning

mod connection;
pub mod error;
pub mod hub;
pub mod peer;
pub mod server;

pub use error::ServerError;
pub use hub::Hub;
pub use peer::{Peer, PeerInfo, PeerRegistry, PeerWriter};
pub use server::{Server, ServerConfig, ServerStats};
