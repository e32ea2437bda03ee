//! Per-cluster configuration: node list, pool sizing, and the tuning
//! constants that drive the dispatcher's retry/refresh state machine.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::ClientError;

/// One `{host, port}` pair, as accepted in the `nodes` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration for one named cluster, loadable from TOML and validated
/// the same way at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterClientConfig {
    /// Init nodes tried in order for the first slot-map fetch and for every
    /// refresh that falls back past the currently-known pools.
    pub nodes: Vec<NodeAddr>,

    /// Sent via `AUTH` on every new worker connection, if set.
    #[serde(default)]
    pub password: Option<String>,

    /// Baseline worker count per primary.
    #[serde(default = "default_size")]
    pub size: usize,

    /// Additional workers a pool may grow to under load.
    #[serde(default = "default_max_overflow")]
    pub max_overflow: usize,

    /// Attempts per request before surfacing `NoConnection`.
    #[serde(default = "default_request_ttl")]
    pub request_ttl: u32,

    /// Delay between retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// CAS retries for `optimistic_locking_transaction`.
    #[serde(default = "default_ol_transaction_ttl")]
    pub ol_transaction_ttl: u32,

    /// Timeout for opening a worker's TCP connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_size() -> usize {
    5
}
fn default_max_overflow() -> usize {
    10
}
fn default_request_ttl() -> u32 {
    16
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_ol_transaction_ttl() -> u32 {
    5
}
fn default_connect_timeout_ms() -> u64 {
    2000
}

impl ClusterClientConfig {
    /// Builds a config with the documented defaults for everything but the
    /// init node list.
    pub fn new(nodes: Vec<NodeAddr>) -> Self {
        Self {
            nodes,
            password: None,
            size: default_size(),
            max_overflow: default_max_overflow(),
            request_ttl: default_request_ttl(),
            retry_delay_ms: default_retry_delay_ms(),
            ol_transaction_ttl: default_ol_transaction_ttl(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Reads and parses a TOML config file, then validates it: read to
    /// string, `toml::from_str`, then `validate()`.
    pub fn from_file(path: &str) -> Result<Self, ClientError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("failed to read '{path}': {e}")))?;
        let config: ClusterClientConfig = toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("failed to parse '{path}': {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.nodes.is_empty() {
            return Err(ClientError::Config("nodes cannot be empty".into()));
        }
        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(ClientError::Config("node host cannot be empty".into()));
            }
            if node.port == 0 {
                return Err(ClientError::Config("node port cannot be 0".into()));
            }
        }
        if self.size == 0 {
            return Err(ClientError::Config("size cannot be 0".into()));
        }
        if self.request_ttl == 0 {
            return Err(ClientError::Config("request_ttl cannot be 0".into()));
        }
        if self.ol_transaction_ttl == 0 {
            return Err(ClientError::Config("ol_transaction_ttl cannot be 0".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_nodes() {
        let config = ClusterClientConfig::new(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_port() {
        let config = ClusterClientConfig::new(vec![NodeAddr::new("127.0.0.1", 0)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = ClusterClientConfig::new(vec![NodeAddr::new("127.0.0.1", 7000)]);
        assert!(config.validate().is_ok());
        assert_eq!(config.request_ttl, 16);
        assert_eq!(config.retry_delay_ms, 100);
        assert_eq!(config.ol_transaction_ttl, 5);
    }

    #[test]
    fn loads_from_a_toml_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"nodes = [{{ host = "127.0.0.1", port = 7000 }}]
               size = 3
               request_ttl = 8"#
        )
        .unwrap();
        let config = ClusterClientConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.nodes, vec![NodeAddr::new("127.0.0.1", 7000)]);
        assert_eq!(config.size, 3);
        assert_eq!(config.request_ttl, 8);
    }

    #[test]
    fn parses_from_toml() {
        let toml_str = r#"
            nodes = [{ host = "10.0.0.1", port = 7000 }, { host = "10.0.0.2", port = 7001 }]
            size = 8
        "#;
        let config: ClusterClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.size, 8);
        assert_eq!(config.max_overflow, 10);
        assert!(config.validate().is_ok());
    }
}
