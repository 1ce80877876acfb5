//! Endpoint configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via POSTBIRD_CONFIG)
//! 3. Environment variables
//!
//! It is read once before a listener or connector starts and is not changed
//! while the endpoint runs.

use postbird_protocol::{
    TransportKind, DEFAULT_BIND_ADDRESS, DEFAULT_PORT, DEFAULT_REMOTE_ADDRESS, MAX_FRAME_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which side of the connection this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Accept connections and broadcast outgoing calls to every peer.
    #[default]
    Server,
    /// Connect to one server and send outgoing calls to it.
    Client,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Server => write!(f, "server"),
            Mode::Client => write!(f, "client"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "server" => Ok(Mode::Server),
            "client" => Ok(Mode::Client),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Operating mode.
    pub mode: Mode,
    /// Transport binding.
    pub transport: TransportKind,
    /// Addresses and ports.
    pub network: NetworkConfig,
    /// Buffer limits.
    pub limits: LimitsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("POSTBIRD_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(mode) = env_parsed::<Mode>("POSTBIRD_MODE")? {
            self.mode = mode;
        }
        if let Some(transport) = env_parsed::<TransportKind>("POSTBIRD_TRANSPORT")? {
            self.transport = transport;
        }
        self.network.apply_env_overrides()?;
        self.limits.apply_env_overrides()?;
        Ok(())
    }

    /// Validates the configuration for the selected mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == Mode::Client {
            if self.network.remote_address.is_empty() {
                return Err(ConfigError::ValidationError(
                    "client mode requires a remote address".to_string(),
                ));
            }
            if self.network.remote_port == 0 {
                return Err(ConfigError::ValidationError(
                    "client mode requires a non-zero remote port".to_string(),
                ));
            }
        }
        if self.limits.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "limits.read_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to. Empty binds every interface.
    pub bind_address: String,
    /// Port the listener binds to (0 picks an ephemeral port).
    pub bind_port: u16,
    /// Server address a client connects to.
    pub remote_address: String,
    /// Server port a client connects to.
    pub remote_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            bind_port: DEFAULT_PORT,
            remote_address: DEFAULT_REMOTE_ADDRESS.to_string(),
            remote_port: DEFAULT_PORT,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("POSTBIRD_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(port) = env_parsed::<u16>("POSTBIRD_BIND_PORT")? {
            self.bind_port = port;
        }
        if let Ok(addr) = std::env::var("POSTBIRD_REMOTE_ADDRESS") {
            self.remote_address = addr;
        }
        if let Some(port) = env_parsed::<u16>("POSTBIRD_REMOTE_PORT")? {
            self.remote_port = port;
        }
        Ok(())
    }

    /// Returns the `host:port` string the listener binds to.
    pub fn bind_endpoint(&self) -> String {
        let host = if self.bind_address.is_empty() {
            "0.0.0.0"
        } else {
            self.bind_address.as_str()
        };
        format!("{}:{}", host, self.bind_port)
    }

    /// Returns the `host:port` string a client dials.
    pub fn remote_endpoint(&self) -> String {
        format!("{}:{}", self.remote_address, self.remote_port)
    }
}

/// Buffer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest record a connection may buffer before it is dropped.
    pub max_frame_bytes: usize,
    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_SIZE,
            read_buffer_size: 8 * 1024,
        }
    }
}

impl LimitsConfig {
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(max) = env_parsed::<usize>("POSTBIRD_MAX_FRAME_BYTES")? {
            self.max_frame_bytes = max;
        }
        if let Some(size) = env_parsed::<usize>("POSTBIRD_READ_BUFFER_SIZE")? {
            self.read_buffer_size = size;
        }
        Ok(())
    }
}

fn env_parsed<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::EnvError(key, e.to_string())),
        Err(_) => Ok(None),
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    EnvError(&'static str, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::EnvError(key, e) => {
                write!(f, "invalid value for {}: {}", key, e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.transport, TransportKind::PushChannel);
        assert_eq!(config.network.bind_address, "127.0.0.1");
        assert_eq!(config.network.bind_port, 8787);
        assert_eq!(config.network.remote_address, "127.0.0.1");
        assert_eq!(config.network.remote_port, 8787);
        assert_eq!(config.limits.max_frame_bytes, MAX_FRAME_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoints() {
        let mut network = NetworkConfig::default();
        assert_eq!(network.bind_endpoint(), "127.0.0.1:8787");
        assert_eq!(network.remote_endpoint(), "127.0.0.1:8787");

        network.bind_address.clear();
        assert_eq!(network.bind_endpoint(), "0.0.0.0:8787");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "mode: client\ntransport: raw_tcp\nnetwork:\n  remote_port: 9000\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.transport, TransportKind::RawTcp);
        assert_eq!(config.network.remote_port, 9000);
        assert_eq!(config.network.remote_address, "127.0.0.1");
        assert_eq!(config.network.bind_port, 8787);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postbird.yaml");

        let mut config = Config::default();
        config.mode = Mode::Client;
        config.network.remote_address = "10.0.0.7".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.mode, Mode::Client);
        assert_eq!(loaded.network.remote_address, "10.0.0.7");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("not/here.yaml"));
    }

    #[test]
    fn test_client_validation() {
        let mut config = Config::default();
        config.mode = Mode::Client;
        config.network.remote_port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.network.remote_port = 8787;
        config.network.remote_address.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Server".parse::<Mode>(), Ok(Mode::Server));
        assert_eq!("client".parse::<Mode>(), Ok(Mode::Client));
        assert!("peer".parse::<Mode>().is_err());
        assert_eq!(Mode::Client.to_string(), "client");
    }
}
