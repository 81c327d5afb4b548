//! Configuration loading for lightmon.
//!
//! Configuration is loaded from a TOML file (default: `lightmon.toml` in the
//! data directory). Every field has a default, so an empty file is valid.

use lightmon_core::{Calibration, NodeRoster, OrchestratorSettings, RosterError, ServerSettings};
use lightmon_node::{FileSensor, FixedSensor, LdrSensor, Sensor};
use lightmon_types::NodeAddress;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the config inside the data directory.
pub const CONFIG_FILE_NAME: &str = "lightmon.toml";

/// Root configuration for lightmon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// This device on the mesh.
    #[serde(default)]
    pub node: NodeConfig,
    /// Node address → socket address of every peer.
    #[serde(default)]
    pub peers: BTreeMap<String, SocketAddr>,
    /// Campaign and polling settings.
    #[serde(default)]
    pub test: TestConfig,
    /// Failure threshold settings.
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Light sensor source.
    #[serde(default)]
    pub sensor: SensorConfig,
}

/// This device on the mesh.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Mesh address (default: 1).
    #[serde(default = "default_address")]
    pub address: u16,
    /// Where a sensor node sends its replies (default: 65535, all nodes).
    #[serde(default = "default_publish")]
    pub publish: u16,
    /// UDP bind address (default: 0.0.0.0:47800).
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Data directory override for the result log.
    pub data_dir: Option<PathBuf>,
}

/// Campaign and polling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TestConfig {
    /// Campaign length in seconds when `start` gets none (default: 60).
    #[serde(default = "default_duration")]
    pub duration_secs: u16,
    /// Roster loaded at coordinator startup.
    #[serde(default)]
    pub roster: Vec<u16>,
    /// Sensor sampling period (default: 1000).
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,
    /// Log replay period (default: 50).
    #[serde(default = "default_replay_period_ms")]
    pub replay_period_ms: u64,
    /// Delay before the first ack poll (default: 2000).
    #[serde(default = "default_ack_delay_ms")]
    pub ack_delay_ms: u64,
    /// Interval between ack polls (default: 500).
    #[serde(default = "default_ack_period_ms")]
    pub ack_period_ms: u64,
    /// Wait after the campaign before result polling (default: 5).
    #[serde(default = "default_result_grace_secs")]
    pub result_grace_secs: u64,
    /// Interval between result polls (default: 1000).
    #[serde(default = "default_result_period_ms")]
    pub result_period_ms: u64,
}

/// Failure threshold settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    /// Threshold until the first calibration (default: 3500).
    #[serde(default = "default_threshold")]
    pub threshold: u16,
    /// Added to the calibration sample (default: 50).
    #[serde(default = "default_margin")]
    pub margin: u16,
}

/// Where readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Constant `value`.
    Fixed,
    /// Integer read from `path` on every sample.
    File,
}

/// Light sensor source.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Source kind (default: fixed).
    #[serde(default = "default_sensor_kind")]
    pub kind: SensorKind,
    /// Reading for `fixed` (default: 0).
    #[serde(default)]
    pub value: u16,
    /// File for `file`.
    pub path: Option<PathBuf>,
    /// Convert ADC counts to LDR resistance (default: false).
    #[serde(default)]
    pub ldr: bool,
}

// Default value functions
fn default_address() -> u16 {
    1
}

fn default_publish() -> u16 {
    NodeAddress::ALL_NODES.value()
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 47800))
}

fn default_duration() -> u16 {
    60
}

fn default_sample_period_ms() -> u64 {
    1000
}

fn default_replay_period_ms() -> u64 {
    50
}

fn default_ack_delay_ms() -> u64 {
    2000
}

fn default_ack_period_ms() -> u64 {
    500
}

fn default_result_grace_secs() -> u64 {
    5
}

fn default_result_period_ms() -> u64 {
    1000
}

fn default_threshold() -> u16 {
    lightmon_core::DEFAULT_THRESHOLD
}

fn default_margin() -> u16 {
    lightmon_core::DEFAULT_MARGIN
}

fn default_sensor_kind() -> SensorKind {
    SensorKind::Fixed
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            publish: default_publish(),
            bind: default_bind(),
            data_dir: None,
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration(),
            roster: Vec::new(),
            sample_period_ms: default_sample_period_ms(),
            replay_period_ms: default_replay_period_ms(),
            ack_delay_ms: default_ack_delay_ms(),
            ack_period_ms: default_ack_period_ms(),
            result_grace_secs: default_result_grace_secs(),
            result_period_ms: default_result_period_ms(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            margin: default_margin(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: default_sensor_kind(),
            value: 0,
            path: None,
            ldr: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// [`Config::validate`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtimes cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = self.address();
        if address.is_unassigned() || address.is_broadcast() {
            return Err(ConfigError::ReservedAddress(self.node.address));
        }

        let periods = [
            ("test.sample_period_ms", self.test.sample_period_ms),
            ("test.replay_period_ms", self.test.replay_period_ms),
            ("test.ack_period_ms", self.test.ack_period_ms),
            ("test.result_period_ms", self.test.result_period_ms),
        ];
        for (field, value) in periods {
            if value == 0 {
                return Err(ConfigError::ZeroPeriod(field));
            }
        }
        Ok(())
    }

    /// This device's mesh address.
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.node.address)
    }

    /// Destination for sensor node replies.
    pub fn publish(&self) -> NodeAddress {
        NodeAddress::new(self.node.publish)
    }

    /// Peer routes keyed by parsed node address.
    pub fn peers(&self) -> Result<BTreeMap<NodeAddress, SocketAddr>, ConfigError> {
        self.peers
            .iter()
            .map(|(key, socket)| {
                let address = key
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPeer(key.clone()))?;
                Ok((NodeAddress::new(address), *socket))
            })
            .collect()
    }

    /// Initial coordinator roster.
    pub fn roster(&self) -> Result<NodeRoster, ConfigError> {
        let mut roster = NodeRoster::new();
        for address in &self.test.roster {
            roster
                .push(NodeAddress::new(*address))
                .map_err(ConfigError::Roster)?;
        }
        Ok(roster)
    }

    /// Sensor node settings.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            calibration: Calibration::new(self.calibration.threshold, self.calibration.margin),
            sample_period: Duration::from_millis(self.test.sample_period_ms),
            replay_period: Duration::from_millis(self.test.replay_period_ms),
        }
    }

    /// Coordinator polling settings.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            ack_delay: Duration::from_millis(self.test.ack_delay_ms),
            ack_period: Duration::from_millis(self.test.ack_period_ms),
            result_grace: Duration::from_secs(self.test.result_grace_secs),
            result_period: Duration::from_millis(self.test.result_period_ms),
        }
    }

    /// Build the configured sensor.
    pub fn sensor(&self) -> Result<Box<dyn Sensor>, ConfigError> {
        let raw: Box<dyn Sensor> = match self.sensor.kind {
            SensorKind::Fixed => Box::new(FixedSensor(self.sensor.value)),
            SensorKind::File => {
                let path = self
                    .sensor
                    .path
                    .clone()
                    .ok_or(ConfigError::MissingSensorPath)?;
                Box::new(FileSensor::new(path))
            }
        };

        if self.sensor.ldr {
            Ok(Box::new(LdrSensor::new(raw)))
        } else {
            Ok(raw)
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Peer key is not a node address.
    #[error("invalid peer address: {0:?}")]
    InvalidPeer(String),
    /// Configured roster is too long.
    #[error("invalid roster: {0}")]
    Roster(RosterError),
    /// Node address is the sentinel or the all-nodes group.
    #[error("node address {0} is reserved")]
    ReservedAddress(u16),
    /// A periodic timer is set to zero.
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
    /// `file` sensor without a path.
    #[error("sensor kind \"file\" needs a path")]
    MissingSensorPath,
}

/// Commented starting point written by `lightmon init`.
pub const SAMPLE_CONFIG: &str = r#"# lightmon configuration

[node]
# Mesh address of this device. 0 is reserved.
address = 1
# Where a sensor node sends its replies. 65535 reaches every node.
publish = 65535
bind = "0.0.0.0:47800"

[peers]
# "5" = "192.168.1.5:47800"
# "7" = "192.168.1.7:47800"

[test]
duration_secs = 60
roster = []
sample_period_ms = 1000
replay_period_ms = 50
ack_delay_ms = 2000
ack_period_ms = 500
result_grace_secs = 5
result_period_ms = 1000

[calibration]
threshold = 3500
margin = 50

[sensor]
# "fixed" returns `value`; "file" reads an integer from `path` (e.g. an IIO ADC channel)
kind = "fixed"
value = 0
ldr = false
"#;
