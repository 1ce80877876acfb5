//! High-level client API.

use crate::connection::{ClientConfig, Connection};
use crate::error::ClientError;
use postbird_core::Dispatcher;
use postbird_protocol::CallFrame;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// High-level client for postbird.
///
/// Calls are one-way: the server runs the function and keeps the result.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Identifier the server assigned to this session (push channel only).
    pub fn session_id(&self) -> Option<String> {
        self.conn.session_id()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection (for background read loop).
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Calls `function_name` on the server with already-built parameters.
    pub async fn call(&self, function_name: &str, params: Vec<Value>) -> Result<(), ClientError> {
        let frame = CallFrame::new(function_name).with_params(params);
        self.conn.send(&frame).await
    }

    /// Calls `function_name` with any serializable arguments.
    pub async fn call_with<T: Serialize>(
        &self,
        function_name: &str,
        args: &[T],
    ) -> Result<(), ClientError> {
        let params = args
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.call(function_name, params).await
    }

    /// Spawns the read loop that runs calls the server broadcasts.
    pub fn spawn_read_loop(&self, dispatcher: Arc<Dispatcher>) -> JoinHandle<Result<(), ClientError>> {
        let conn = self.conn.clone();
        tokio::spawn(async move { conn.read_loop(dispatcher).await })
    }
}
