//! # postbird-client
//!
//! Client library for postbird.
//!
//! This crate provides:
//! - Async TCP client for either transport
//! - One-way calls to functions the server registered
//! - A read loop that runs calls the server broadcasts back

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{ClientConfig, Connection};
pub use error::ClientError;
