//! Typed configuration for the QUIC session multiplexer and QPACK encoder.
//!
//! Configuration is loaded from YAML, following the same
//! `serde` + `serde_yaml_ng` conventions used across the workspace. The
//! fields here only cover what `sniproxy-core` actually consumes: the QUIC
//! transport knobs (`quic`) and the QPACK table/budget knobs (`http3`). A
//! full deployment config would also carry listener addresses, TLS material,
//! and backend routing, but those belong to the UDP endpoint and TLS/ALPN
//! handshake layers this workspace treats as external collaborators.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: Metrics,
    /// QUIC transport configuration consumed by `QuicSession`.
    #[serde(default)]
    pub quic: QuicConfig,
    /// HTTP/3 and QPACK configuration consumed by `Encoder`.
    #[serde(default)]
    pub http3: Http3Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics: Metrics::default(),
            quic: QuicConfig::default(),
            http3: Http3Config::default(),
        }
    }
}

/// Prometheus metrics server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Whether to enable metrics collection.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics endpoint (e.g., "127.0.0.1:9000").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "127.0.0.1:9000".to_string()
}

/// QUIC transport configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QuicConfig {
    /// Maximum concurrent bidirectional streams per connection (default: 100).
    ///
    /// This is a soft cap the session logs against; enforcement of the
    /// actual stream limit is the underlying QUIC transport's job.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,
    /// Maximum idle timeout in milliseconds (default: 60000).
    ///
    /// Seeds the flusher's timer budget when no other `next_timeout` value
    /// has yet been reported by the transport.
    #[serde(default = "default_max_idle_timeout_ms")]
    pub max_idle_timeout_ms: u64,
    /// Maximum datagram size in bytes (default: 1350 for MTU safety).
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: default_max_concurrent_streams(),
            max_idle_timeout_ms: default_max_idle_timeout_ms(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

fn default_max_concurrent_streams() -> u32 {
    100
}

fn default_max_idle_timeout_ms() -> u64 {
    60_000
}

fn default_max_datagram_size() -> usize {
    1350
}

/// HTTP/3 and QPACK configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Http3Config {
    /// Maximum HTTP header field section size in bytes (default: 8192).
    #[serde(default = "default_max_field_section_size")]
    pub max_field_section_size: usize,
    /// QPACK dynamic table capacity in bytes (default: 4096).
    #[serde(default = "default_qpack_max_table_capacity")]
    pub qpack_max_table_capacity: usize,
    /// QPACK maximum number of streams allowed to be blocked at once (default: 16).
    #[serde(default = "default_qpack_blocked_streams")]
    pub qpack_blocked_streams: u16,
}

impl Default for Http3Config {
    fn default() -> Self {
        Self {
            max_field_section_size: default_max_field_section_size(),
            qpack_max_table_capacity: default_qpack_max_table_capacity(),
            qpack_blocked_streams: default_qpack_blocked_streams(),
        }
    }
}

fn default_max_field_section_size() -> usize {
    8192
}

fn default_qpack_max_table_capacity() -> usize {
    4096
}

fn default_qpack_blocked_streams() -> u16 {
    16
}

impl Config {
    /// Loads configuration from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config = serde_yaml_ng::from_str(&contents)?;
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// This is primarily used for testing and programmatic configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use sniproxy_config::Config;
    ///
    /// let yaml = r#"
    /// quic:
    ///   max_concurrent_streams: 200
    /// http3:
    ///   qpack_max_table_capacity: 8192
    /// "#;
    ///
    /// let config = Config::parse(yaml).unwrap();
    /// assert_eq!(config.quic.max_concurrent_streams, 200);
    /// assert_eq!(config.http3.qpack_max_table_capacity, 8192);
    /// ```
    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config = serde_yaml_ng::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_parsing() {
        let yaml = r#"
metrics:
  enabled: true
  address: "127.0.0.1:9000"
quic:
  max_concurrent_streams: 50
  max_idle_timeout_ms: 30000
http3:
  qpack_max_table_capacity: 2048
  qpack_blocked_streams: 8
"#;
        let config = Config::parse(yaml).unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "127.0.0.1:9000");
        assert_eq!(config.quic.max_concurrent_streams, 50);
        assert_eq!(config.quic.max_idle_timeout_ms, 30000);
        assert_eq!(config.http3.qpack_max_table_capacity, 2048);
        assert_eq!(config.http3.qpack_blocked_streams, 8);
    }

    #[test]
    fn test_defaults_apply_when_sections_are_absent() {
        let config = Config::parse("{}").unwrap();
        assert!(!config.metrics.enabled);
        assert_eq!(config.quic.max_concurrent_streams, 100);
        assert_eq!(config.http3.qpack_max_table_capacity, 4096);
        assert_eq!(config.http3.qpack_blocked_streams, 16);
    }

    #[test]
    fn test_invalid_yaml() {
        let yaml = "invalid: yaml: content: ::::";
        let result = Config::parse(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let yaml = r#"
quic:
  max_concurrent_streams: 16
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.quic.max_concurrent_streams, 16);
        assert_eq!(config.quic.max_datagram_size, 1350);
        assert_eq!(config.http3.qpack_blocked_streams, 16);
    }
}
