//! # postbird
//!
//! Minimal remote procedure calls over TCP.
//!
//! A process registers plain Rust functions, then runs as either a server
//! (accepting peers and running the calls they send) or a client (connected
//! to one server). Either side may call functions on the other; calls are
//! one-way and results stay with the side that ran them.
//!
//! ```no_run
//! use postbird::{Config, Endpoint, FunctionRegistry};
//!
//! # async fn demo() -> Result<(), postbird::EndpointError> {
//! let registry = FunctionRegistry::new().with("add", |a: i64, b: i64| a + b);
//! let endpoint = Endpoint::start(Config::default(), registry).await?;
//! endpoint.call("add", vec![1.into(), 2.into()]).await?;
//! endpoint.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub use postbird_client::{Client, ClientConfig, ClientError};
pub use postbird_core::{
    Config, ConfigError, DispatchError, Dispatcher, FunctionRegistry, Mode, ParamEncoding,
};
pub use postbird_protocol::{CallFrame, TransportKind};
pub use postbird_server::{PeerInfo, Server, ServerConfig, ServerError};

use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};

/// Errors from starting, using or stopping an [`Endpoint`].
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("background task failed: {0}")]
    Task(#[from] JoinError),
}

enum Role {
    Server {
        server: Arc<Server>,
        local_addr: SocketAddr,
        task: JoinHandle<Result<(), ServerError>>,
    },
    Client {
        client: Client,
        reader: JoinHandle<Result<(), ClientError>>,
    },
}

/// A running server or client, chosen by [`Config::mode`].
pub struct Endpoint {
    role: Role,
}

impl Endpoint {
    /// Starts an endpoint.
    ///
    /// In server mode the bind address is bound before this returns, so a
    /// taken port fails here. In client mode the connection is established
    /// and a read loop is spawned to run calls the server broadcasts.
    pub async fn start(config: Config, registry: FunctionRegistry) -> Result<Self, EndpointError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(registry));

        let role = match config.mode {
            Mode::Server => {
                let server_config = ServerConfig::from(&config);
                let listener = TcpListener::bind(&server_config.bind_addr)
                    .await
                    .map_err(|source| ServerError::Bind {
                        addr: server_config.bind_addr.clone(),
                        source,
                    })?;
                let local_addr = listener.local_addr().map_err(ServerError::Io)?;

                let server = Arc::new(Server::new(server_config, dispatcher));
                let task = tokio::spawn({
                    let server = server.clone();
                    async move { server.serve(listener).await }
                });
                Role::Server {
                    server,
                    local_addr,
                    task,
                }
            }
            Mode::Client => {
                let client = Client::new(ClientConfig::from(&config));
                client.connect().await?;
                let reader = client.spawn_read_loop(dispatcher);
                Role::Client { client, reader }
            }
        };

        Ok(Self { role })
    }

    pub fn mode(&self) -> Mode {
        match self.role {
            Role::Server { .. } => Mode::Server,
            Role::Client { .. } => Mode::Client,
        }
    }

    /// Calls a function on the other side.
    ///
    /// A server broadcasts to every connected peer and returns how many were
    /// written (zero peers is not an error). A client writes to its server
    /// and returns 1, or fails with `NotConnected`.
    pub async fn call(&self, function_name: &str, params: Vec<Value>) -> Result<usize, EndpointError> {
        match &self.role {
            Role::Server { server, .. } => Ok(server.call(function_name, params).await?),
            Role::Client { client, .. } => {
                client.call(function_name, params).await?;
                Ok(1)
            }
        }
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.role {
            Role::Server { local_addr, .. } => Some(*local_addr),
            Role::Client { .. } => None,
        }
    }

    pub fn server(&self) -> Option<&Arc<Server>> {
        match &self.role {
            Role::Server { server, .. } => Some(server),
            Role::Client { .. } => None,
        }
    }

    pub fn client(&self) -> Option<&Client> {
        match &self.role {
            Role::Client { client, .. } => Some(client),
            Role::Server { .. } => None,
        }
    }

    /// Runs until `signal` resolves or the endpoint stops on its own.
    ///
    /// The endpoint stops on its own when the listener fails or the server
    /// drops a client's connection.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> Result<(), EndpointError> {
        match self.role {
            Role::Server {
                server, mut task, ..
            } => {
                tokio::select! {
                    _ = signal => {
                        server.shutdown();
                        Ok(task.await??)
                    }
                    result = &mut task => Ok(result??),
                }
            }
            Role::Client { client, mut reader } => {
                tokio::select! {
                    _ = signal => {
                        client.close().await?;
                        match reader.await? {
                            Ok(()) | Err(ClientError::ConnectionClosed) => Ok(()),
                            Err(e) => Err(e.into()),
                        }
                    }
                    result = &mut reader => {
                        let _ = client.close().await;
                        Ok(result??)
                    }
                }
            }
        }
    }

    /// Stops the endpoint, closing every connection it holds.
    pub async fn shutdown(self) -> Result<(), EndpointError> {
        self.run_until(std::future::ready(())).await
    }
}
