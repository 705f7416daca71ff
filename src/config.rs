//! Runtime configuration.
//!
//! Every knob that used to be a compile-time constant is a field here. Values come
//! from a YAML document, with the `LISTEN` environment variable overriding the
//! listening address.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PAGESERVE_CONFIG";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "pageserve.yaml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool.capacity must be at least 1")]
    ZeroCapacity,

    #[error("pool.request_buffer_size must be at least 1")]
    ZeroRequestBuffer,

    #[error("static_files.chunk_size must be at least 1")]
    ZeroChunkSize,

    #[error("static_files.routes_root must not be empty")]
    EmptyRoutesRoot,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub static_files: StaticFilesConfig,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to, e.g. `0.0.0.0:8080`.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of in-flight connections.
    pub capacity: usize,
    /// Hard capacity of each connection's request buffer, in bytes.
    pub request_buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Directory prefix every request path is appended to.
    pub routes_root: String,
    /// Bytes read from disk per transmit step.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Seconds without progress before a connection is dropped. 0 disables the sweep.
    pub idle_timeout_secs: u64,
    /// Parse as soon as any bytes arrived instead of waiting for the end of the
    /// request line.
    pub lenient_request_line: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 24,
            request_buffer_size: 2048,
        }
    }
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            routes_root: "./routes".to_string(),
            chunk_size: 4096,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            lenient_request_line: false,
        }
    }
}

impl ConnectionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Config {
    /// Loads the configuration for the binary.
    ///
    /// Looks at `PAGESERVE_CONFIG` first, then `pageserve.yaml` in the working
    /// directory, then falls back to defaults. `LISTEN` overrides the address.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::from_file(&local)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.pool.request_buffer_size == 0 {
            return Err(ConfigError::ZeroRequestBuffer);
        }
        if self.static_files.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.static_files.routes_root.is_empty() {
            return Err(ConfigError::EmptyRoutesRoot);
        }
        Ok(())
    }
}
