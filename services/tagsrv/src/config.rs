//! tagsrv configuration
//!
//! Defaults ← YAML file ← `TAGSRV_*` environment (`__` separates nesting,
//! e.g. `TAGSRV_SINK__URL=http://erp:8069`).

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uhf_link::transport::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_TCP_PORT};
use uhf_link::types::DEFAULT_ADDRESS;
use uhf_link::{Endpoint, InventoryParams, ProtocolVariant, SessionConfig};

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/tagsrv.yaml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TAGSRV_";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Service section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "tagsrv".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Upstream sink kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// ERP JSON-RPC endpoint
    Erp,
    /// Log every delivery (mock mode)
    Log,
}

/// Sink section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub url: Option<String>,
    pub database: String,
    pub username: String,
    pub password: String,
    pub model: String,
    pub batch_method: String,
    pub single_method: String,
    pub timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            url: None,
            database: "odoo".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            model: "rfid.tag.scan".to_string(),
            batch_method: "batch_rfid_scan_action".to_string(),
            single_method: "rfid_scan_action".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How accepted tags reach the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorMode {
    /// Buffer distinct EPCs and deliver them as one batch after an idle gap
    Batch,
    /// Deliver every accepted EPC immediately
    PerTag,
}

/// Aggregator section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub mode: AggregatorMode,
    pub debounce_ms: u64,
    pub flush_idle_ms: u64,
    pub max_batch_size: usize,
    pub retention_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            mode: AggregatorMode::Batch,
            debounce_ms: 2_000,
            flush_idle_ms: 1_000,
            max_batch_size: 500,
            retention_ms: 60_000,
        }
    }
}

/// Supervisor section (reconnect backoff)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_address() -> u8 {
    DEFAULT_ADDRESS
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_error_threshold() -> u32 {
    10
}

fn default_health_window_ms() -> u64 {
    60_000
}

fn default_crc_failure_ratio() -> f64 {
    0.5
}

fn default_health_windows() -> u32 {
    3
}

/// One reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub name: String,
    pub endpoint: Endpoint,
    #[serde(default = "default_address")]
    pub address: u8,
    /// Source identifier sent upstream; defaults to the host or device path
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub protocol: ProtocolVariant,
    #[serde(default)]
    pub inventory: InventoryParams,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive failed cycles before the link is rebuilt
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_health_window_ms")]
    pub health_window_ms: u64,
    /// CRC failure ratio above which a health window counts as bad
    #[serde(default = "default_crc_failure_ratio")]
    pub crc_failure_ratio: f64,
    /// Bad windows in a row before a protocol mismatch is reported
    #[serde(default = "default_health_windows")]
    pub health_windows: u32,
}

impl ReaderConfig {
    /// Reader with defaults for everything but name and endpoint
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            address: DEFAULT_ADDRESS,
            source: None,
            protocol: ProtocolVariant::default(),
            inventory: InventoryParams::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            poll_interval_ms: default_poll_interval_ms(),
            error_threshold: default_error_threshold(),
            health_window_ms: default_health_window_ms(),
            crc_failure_ratio: default_crc_failure_ratio(),
            health_windows: default_health_windows(),
        }
    }

    /// Source identifier used for upstream calls
    pub fn source_id(&self) -> String {
        self.source
            .clone()
            .unwrap_or_else(|| self.endpoint.target().to_string())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            address: self.address,
            protocol: self.protocol,
            read_timeout_ms: self.read_timeout_ms,
            inventory: self.inventory,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsrvConfig {
    pub service: ServiceConfig,
    pub sink: SinkConfig,
    pub aggregator: AggregatorConfig,
    pub supervisor: SupervisorConfig,
    pub readers: Vec<ReaderConfig>,
}

/// Endpoint from `--ip/--serial/--port` style arguments
///
/// `port` is the TCP port for network readers and the baud rate for serial ones.
pub fn endpoint_from_args(
    ip: Option<&str>,
    serial: Option<&str>,
    port: Option<u32>,
) -> Option<Endpoint> {
    if let Some(device) = serial {
        return Some(Endpoint::serial(device, port.unwrap_or(DEFAULT_BAUD_RATE)));
    }
    ip.map(|host| {
        let tcp_port = port
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_TCP_PORT);
        Endpoint::tcp(host, tcp_port)
    })
}

impl TagsrvConfig {
    /// Load from `path` (or the default file) plus `TAGSRV_*` environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_env(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        Ok(config)
    }

    /// Replace the reader list with one ad-hoc reader
    pub fn with_single_reader(mut self, endpoint: Endpoint, address: Option<u8>) -> Self {
        let mut reader = ReaderConfig::new(endpoint.target().to_string(), endpoint);
        if let Some(address) = address {
            reader.address = address;
        }
        self.readers = vec![reader];
        self
    }

    /// Semantic checks serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.readers.is_empty() {
            return Err(ConfigError::Invalid(
                "no readers configured (add `readers:` or pass --ip/--serial)".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for reader in &self.readers {
            if reader.name.trim().is_empty() {
                return Err(ConfigError::Invalid("reader name is empty".to_string()));
            }
            if !names.insert(reader.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate reader name '{}'",
                    reader.name
                )));
            }
            if reader.poll_interval_ms == 0 || reader.read_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "reader '{}': poll_interval_ms and read_timeout_ms must be non-zero",
                    reader.name
                )));
            }
            if reader.inventory.listen_window_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "reader '{}': inventory.listen_window_ms must be non-zero",
                    reader.name
                )));
            }
            if reader.error_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "reader '{}': error_threshold must be at least 1",
                    reader.name
                )));
            }
            reader
                .protocol
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("reader '{}': {}", reader.name, e)))?;
        }

        let has_url = self
            .sink
            .url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if self.sink.kind == SinkKind::Erp && !has_url {
            return Err(ConfigError::Invalid(
                "sink.kind is erp but sink.url is not set".to_string(),
            ));
        }

        let agg = &self.aggregator;
        if agg.flush_idle_ms == 0 || agg.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.flush_idle_ms and max_batch_size must be non-zero".to_string(),
            ));
        }
        if agg.retention_ms < agg.debounce_ms {
            return Err(ConfigError::Invalid(format!(
                "aggregator.retention_ms ({}) is shorter than debounce_ms ({})",
                agg.retention_ms, agg.debounce_ms
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const NO_ENV: &str = "TAGSRV_UNIT_TEST_UNSET_";

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_yaml(
            r#"
service:
  name: tagsrv-dock
  log_level: debug
sink:
  kind: erp
  url: http://erp.local:8069
  database: warehouse
aggregator:
  mode: per_tag
  debounce_ms: 3000
readers:
  - name: dock-1
    endpoint: { type: tcp, host: 192.168.1.190 }
  - name: bench
    endpoint: { type: serial, device: /dev/ttyUSB0, baud_rate: 115200 }
    address: 255
    protocol: { framing: header_prefixed, checksum: twos_complement }
    inventory: { q: 6, listen_window_ms: 300 }
"#,
        );

        let config = TagsrvConfig::load_with_env(Some(file.path()), NO_ENV).unwrap();
        config.validate().unwrap();

        assert_eq!(config.service.name, "tagsrv-dock");
        assert_eq!(config.sink.kind, SinkKind::Erp);
        assert_eq!(config.sink.database, "warehouse");
        assert_eq!(config.sink.model, "rfid.tag.scan");
        assert_eq!(config.aggregator.mode, AggregatorMode::PerTag);
        assert_eq!(config.aggregator.debounce_ms, 3000);
        assert_eq!(config.aggregator.flush_idle_ms, 1000);

        let dock = &config.readers[0];
        assert_eq!(dock.endpoint, Endpoint::tcp("192.168.1.190", 6000));
        assert_eq!(dock.source_id(), "192.168.1.190");
        assert_eq!(dock.protocol, ProtocolVariant::LENGTH_CRC16);
        assert_eq!(dock.error_threshold, 10);

        let bench = &config.readers[1];
        assert_eq!(bench.endpoint, Endpoint::serial("/dev/ttyUSB0", 115200));
        assert_eq!(bench.address, 0xFF);
        assert_eq!(bench.protocol, ProtocolVariant::HEADER_TWOS_COMPLEMENT);
        assert_eq!(bench.inventory.q, 6);
        assert_eq!(bench.inventory.session, 0);
        assert_eq!(bench.inventory.listen_window_ms, 300);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            TagsrvConfig::load_with_env(Some(Path::new("/nonexistent/tagsrv.yaml")), NO_ENV)
                .unwrap();
        assert_eq!(config, TagsrvConfig::default());
        // Defaults alone are not runnable
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_yaml("sink:\n  kind: log\n");
        let prefix = "TAGSRV_UNIT_TEST_ENV_";
        std::env::set_var(format!("{prefix}SINK__TIMEOUT_MS"), "2500");

        let config = TagsrvConfig::load_with_env(Some(file.path()), prefix).unwrap();
        assert_eq!(config.sink.timeout_ms, 2500);

        std::env::remove_var(format!("{prefix}SINK__TIMEOUT_MS"));
    }

    #[test]
    fn test_validation_errors() {
        let base = TagsrvConfig::default()
            .with_single_reader(Endpoint::tcp("10.0.0.5", 6000), None);
        base.validate().unwrap();

        let mut dup = base.clone();
        dup.readers.push(dup.readers[0].clone());
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));

        let mut erp = base.clone();
        erp.sink.kind = SinkKind::Erp;
        assert!(erp.validate().is_err());
        erp.sink.url = Some("http://erp:8069".to_string());
        assert!(erp.validate().is_ok());

        let mut zero = base.clone();
        zero.readers[0].poll_interval_ms = 0;
        assert!(zero.validate().is_err());

        let mut short = base;
        short.aggregator.retention_ms = 1000;
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_endpoint_from_args() {
        assert_eq!(
            endpoint_from_args(Some("192.168.1.190"), None, None),
            Some(Endpoint::tcp("192.168.1.190", 6000))
        );
        assert_eq!(
            endpoint_from_args(Some("192.168.1.190"), None, Some(4001)),
            Some(Endpoint::tcp("192.168.1.190", 4001))
        );
        assert_eq!(
            endpoint_from_args(None, Some("/dev/ttyUSB0"), None),
            Some(Endpoint::serial("/dev/ttyUSB0", 57600))
        );
        assert_eq!(
            endpoint_from_args(Some("ignored"), Some("COM3"), Some(115200)),
            Some(Endpoint::serial("COM3", 115200))
        );
        assert_eq!(endpoint_from_args(None, None, Some(6000)), None);
    }

    #[test]
    fn test_single_reader_override() {
        let config = TagsrvConfig::default()
            .with_single_reader(Endpoint::serial("/dev/ttyUSB1", 57600), Some(0x01));
        assert_eq!(config.readers.len(), 1);
        assert_eq!(config.readers[0].name, "/dev/ttyUSB1");
        assert_eq!(config.readers[0].address, 0x01);
        assert_eq!(config.readers[0].session_config().address, 0x01);
    }
}
