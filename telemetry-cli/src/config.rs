//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use telemetry_core::{StartPosition, DEFAULT_SHM_NAME};

/// Main application configuration (loaded from telemetry.toml)
///
/// Every section is optional; missing keys take the defaults below.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// SocketCAN interface name
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Socket read timeout; bounds how long a shutdown or reload request waits
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

fn default_interface() -> String {
    "can0".to_string()
}

fn default_read_timeout() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelsConfig {
    /// Channel table file, `.dbc` or `.json`
    #[serde(default = "default_channels_path")]
    pub path: PathBuf,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            path: default_channels_path(),
        }
    }
}

fn default_channels_path() -> PathBuf {
    PathBuf::from("/tmp/channels.dbc")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// POSIX shared memory name of the broadcast queue
    #[serde(default = "default_shm_name")]
    pub shm_name: String,
    /// Unlink a segment left over from a crashed reader before creating ours
    #[serde(default = "default_true")]
    pub reclaim_stale: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            shm_name: default_shm_name(),
            reclaim_stale: true,
        }
    }
}

fn default_shm_name() -> String {
    DEFAULT_SHM_NAME.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    /// Directory receiving one binary log per session
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Sleep between polls when the queue had nothing new
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Where a freshly attached consumer starts reading
    #[serde(default)]
    pub start: StartFrom,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            poll_interval_ms: default_poll_interval(),
            start: StartFrom::default(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/telemetry-logs")
}

fn default_poll_interval() -> u64 {
    1
}

/// Consumer start policy as written in config files and on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// Skip the backlog, see only new messages
    #[default]
    Latest,
    /// Replay whatever is still in the queue
    Beginning,
}

impl From<StartFrom> for StartPosition {
    fn from(start: StartFrom) -> Self {
        match start {
            StartFrom::Latest => StartPosition::Latest,
            StartFrom::Beginning => StartPosition::Beginning,
        }
    }
}

impl AppConfig {
    /// Reject settings that would make a loop misbehave
    pub fn validate(&self) -> Result<()> {
        if self.bus.interface.is_empty() {
            bail!("bus.interface must not be empty");
        }
        if self.bus.read_timeout_ms == 0 {
            bail!("bus.read_timeout_ms must be greater than 0");
        }
        if self.logger.poll_interval_ms == 0 {
            bail!("logger.poll_interval_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [bus]
            interface = "vcan0"

            [channels]
            path = "/etc/telemetry/channels.json"

            [queue]
            shm_name = "/bench_queue"
            reclaim_stale = false

            [logger]
            dir = "/var/log/telemetry"
            poll_interval_ms = 5
            start = "beginning"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.bus.interface, "vcan0");
        assert_eq!(config.bus.read_timeout_ms, 100);
        assert_eq!(config.channels.path, PathBuf::from("/etc/telemetry/channels.json"));
        assert_eq!(config.queue.shm_name, "/bench_queue");
        assert!(!config.queue.reclaim_stale);
        assert_eq!(config.logger.poll_interval_ms, 5);
        assert_eq!(config.logger.start, StartFrom::Beginning);
        assert_eq!(StartPosition::from(config.logger.start), StartPosition::Beginning);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.bus.interface, "can0");
        assert_eq!(config.channels.path, PathBuf::from("/tmp/channels.dbc"));
        assert_eq!(config.queue.shm_name, "/vehicle_telemetry");
        assert!(config.queue.reclaim_stale);
        assert_eq!(config.logger.dir, PathBuf::from("/tmp/telemetry-logs"));
        assert_eq!(config.logger.start, StartFrom::Latest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_rejects_zero_poll_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logger]\npoll_interval_ms = 0").unwrap();
        file.flush().unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("poll_interval_ms"));
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus\ninterface = ").unwrap();
        file.flush().unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
