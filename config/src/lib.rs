//! Typed configuration, loaded from a TOML file and overridable by
//! `BTCWATCH_*` environment variables.
//!
//! The teacher's own `ckb-app-config` mixes a TOML file with CLI flags via a
//! dedicated crate (`ckb-logger-config`, `ckb-metrics-config`, ...); a
//! single-service watcher doesn't carry enough configuration surface to
//! justify that split, so it is one struct here.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment variable {0} is not valid unicode")]
    InvalidEnv(String),
    #[error("environment variable {name} could not be parsed as {expected}: {value}")]
    BadEnvValue {
        name: String,
        expected: &'static str,
        value: String,
    },
}

/// Connection and timing parameters for the watched full node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Host or IP of the full node.
    pub node_host: String,
    /// JSON-RPC port.
    pub rpc_port: u16,
    /// HTTP Basic auth username for the RPC endpoint.
    pub rpc_user: String,
    /// HTTP Basic auth password for the RPC endpoint.
    pub rpc_password: String,
    /// Per-call RPC deadline, in seconds (§4.1, ≈90s).
    pub rpc_timeout_secs: u64,

    /// Expected port for the raw-transaction publish/subscribe stream.
    /// Missing this endpoint at startup is fatal (§6).
    pub rawtx_port: u16,
    /// Expected port for the raw-block publish/subscribe stream, if the
    /// node advertises one. Preferred over the sequence stream when present.
    pub rawblock_port: Option<u16>,
    /// Expected port for the sequence stream, used only when no raw-block
    /// stream is advertised.
    pub sequence_port: Option<u16>,

    /// Interval for the best-block-hash polling fallback when neither
    /// block-hinting stream is available (§4.2, 60s).
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            node_host: "127.0.0.1".to_string(),
            rpc_port: 8332,
            rpc_user: String::new(),
            rpc_password: String::new(),
            rpc_timeout_secs: 90,
            rawtx_port: 28332,
            rawblock_port: Some(28333),
            sequence_port: None,
            poll_interval_secs: 60,
        }
    }
}

impl WatcherConfig {
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.node_host, self.rpc_port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Load from a TOML file, then apply any `BTCWATCH_*` environment
    /// variable overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: WatcherConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_string("BTCWATCH_NODE_HOST")? {
            self.node_host = v;
        }
        if let Some(v) = env_parsed("BTCWATCH_RPC_PORT")? {
            self.rpc_port = v;
        }
        if let Some(v) = env_string("BTCWATCH_RPC_USER")? {
            self.rpc_user = v;
        }
        if let Some(v) = env_string("BTCWATCH_RPC_PASSWORD")? {
            self.rpc_password = v;
        }
        if let Some(v) = env_parsed("BTCWATCH_RPC_TIMEOUT_SECS")? {
            self.rpc_timeout_secs = v;
        }
        if let Some(v) = env_parsed("BTCWATCH_RAWTX_PORT")? {
            self.rawtx_port = v;
        }
        if let Some(v) = env_parsed::<u16>("BTCWATCH_RAWBLOCK_PORT")? {
            self.rawblock_port = Some(v);
        }
        if let Some(v) = env_parsed::<u16>("BTCWATCH_SEQUENCE_PORT")? {
            self.sequence_port = Some(v);
        }
        if let Some(v) = env_parsed("BTCWATCH_POLL_INTERVAL_SECS")? {
            self.poll_interval_secs = v;
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnv(name.to_string())),
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name)? {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::BadEnvValue {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node_host = \"10.0.0.5\"\nrpc_port = 8333\nrpc_user = \"u\"\nrpc_password = \"p\"\nrpc_timeout_secs = 90\nrawtx_port = 28332\npoll_interval_secs = 60\n").unwrap();
        let config = WatcherConfig::load(file.path()).unwrap();
        assert_eq!(config.node_host, "10.0.0.5");
        assert_eq!(config.rpc_url(), "http://10.0.0.5:8333");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = WatcherConfig::load(Path::new("/does/not/exist.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
