//! # postbird-core
//!
//! Everything a postbird endpoint needs that is independent of the socket:
//!
//! - [`FunctionRegistry`]: named, type-erased handlers
//! - [`Dispatcher`]: arity-checked invocation of registered handlers
//! - Peer identifier generation
//! - Endpoint [`Config`] loaded from YAML and environment variables

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod peer_id;
pub mod registry;

pub use config::{Config, ConfigError, LimitsConfig, Mode, NetworkConfig};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use peer_id::{generate_peer_id, PEER_ID_LEN};
pub use registry::{ErasedHandler, FunctionRegistry, Handler, ParamEncoding};
