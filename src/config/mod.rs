//! # Configuration
//!
//! TOML configuration for the bridge, loaded once at startup.
//!
//! ## Sections
//!
//! - [`GatewayConfig`]: where the gateway lives and how the link behaves
//! - [`DeviceDefaults`]: fallbacks for per-device options
//! - [`DeviceConfig`]: statically configured devices, keyed by device id
//! - [`BridgeConfig`]: automatic add, queue sizes, stats logging
//! - [`LoggingConfig`]: log level and optional log file
//!
//! ## Example
//!
//! ```toml
//! [gateway]
//! port = "/dev/ttyACM0"
//! baud_rate = 57600
//! wait_for_ack = true
//! reconnect_interval = 10
//! ignore_devices = ["digitech_*"]
//!
//! [device_defaults]
//! fire_event = false
//! signal_repetitions = 1
//!
//! [devices.newkaku_0000c6c2_1]
//! name = "Living room"
//! kind = "light"
//! aliases = ["newkaku_0000c6c2_2"]
//! signal_repetitions = 2
//! ```
//!
//! When `host` is set, `port` is a TCP port number instead of a serial device.
//!
//! ```rust,no_run
//! use rfbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("gateway: {}", config.gateway.target()?);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::fs;

use crate::bridge::connection::ManagerSettings;
use crate::bridge::device::{DeviceKind, DeviceSettings};
use crate::gateway::link::LinkSettings;
use crate::gateway::{ConnectTarget, IgnoreList};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub device_defaults: DeviceDefaults,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

/// Serial device path, or TCP port number when a host is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Path(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_true")]
    pub wait_for_ack: bool,
    /// Seconds between connection attempts after a failure.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Seconds one connection attempt may take.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Device ids dropped at the transport; `*` and `?` wildcards allowed.
    #[serde(default)]
    pub ignore_devices: Vec<String>,
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_true() -> bool {
    true
}

fn default_reconnect_interval() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

fn default_signal_repetitions() -> u32 {
    1
}

fn default_event_queue() -> usize {
    256
}

fn default_stats_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    pub fn target(&self) -> Result<ConnectTarget> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| anyhow!("gateway.port must be set"))?;
        match (&self.host, port) {
            (Some(host), PortSpec::Number(port)) => Ok(ConnectTarget::Tcp {
                host: host.clone(),
                port: *port,
            }),
            (Some(host), PortSpec::Path(p)) => {
                let port = p.parse::<u16>().map_err(|_| {
                    anyhow!("gateway.port {:?} is not a TCP port for host {}", p, host)
                })?;
                Ok(ConnectTarget::Tcp {
                    host: host.clone(),
                    port,
                })
            }
            (None, PortSpec::Path(path)) => Ok(ConnectTarget::Serial {
                path: path.clone(),
                baud_rate: self.baud_rate,
            }),
            (None, PortSpec::Number(n)) => Err(anyhow!(
                "gateway.port is the number {} but no gateway.host is set",
                n
            )),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn manager_settings(&self) -> Result<ManagerSettings> {
        Ok(ManagerSettings {
            target: self.target()?,
            reconnect_interval: self.reconnect_interval(),
            connect_timeout: self.connect_timeout(),
        })
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            ignore: IgnoreList::new(self.ignore_devices.iter().cloned()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefaults {
    #[serde(default)]
    pub fire_event: bool,
    #[serde(default = "default_signal_repetitions")]
    pub signal_repetitions: u32,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            fire_event: false,
            signal_repetitions: default_signal_repetitions(),
        }
    }
}

impl DeviceDefaults {
    /// Settings for a device nobody configured, e.g. one found by automatic add.
    pub fn settings_for(&self, id: &str, kind: DeviceKind) -> DeviceSettings {
        let mut settings = DeviceSettings::new(id, kind);
        settings.fire_event = self.fire_event;
        settings.signal_repetitions = self.signal_repetitions;
        settings
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_event: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_repetitions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Create devices for unknown ids as their events arrive.
    #[serde(default = "default_true")]
    pub automatic_add: bool,
    /// Capacity of the transport to router channel.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
    /// Seconds between debug stats lines; 0 disables them.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            automatic_add: true,
            event_queue: default_event_queue(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Basic sanity checks. Anything finer is left to the gateway.
    pub fn validate(&self) -> Result<()> {
        self.gateway.target()?;
        if self.gateway.reconnect_interval == 0 {
            return Err(anyhow!("gateway.reconnect_interval must be at least 1 second"));
        }
        if self.device_defaults.signal_repetitions == 0 {
            return Err(anyhow!("device_defaults.signal_repetitions must be at least 1"));
        }
        for (id, device) in &self.devices {
            if device.signal_repetitions == Some(0) {
                return Err(anyhow!("devices.{}.signal_repetitions must be at least 1", id));
            }
        }
        if self.bridge.event_queue == 0 {
            return Err(anyhow!("bridge.event_queue must be at least 1"));
        }
        Ok(())
    }

    /// Configured devices with defaults filled in.
    pub fn device_settings(&self) -> Vec<DeviceSettings> {
        self.devices
            .iter()
            .map(|(id, d)| DeviceSettings {
                id: id.clone(),
                name: d.name.clone(),
                kind: d.kind,
                aliases: d.aliases.clone(),
                fire_event: d.fire_event.unwrap_or(self.device_defaults.fire_event),
                signal_repetitions: d
                    .signal_repetitions
                    .unwrap_or(self.device_defaults.signal_repetitions),
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gateway: GatewayConfig {
                port: Some(PortSpec::Path("/dev/ttyACM0".to_string())),
                host: None,
                baud_rate: default_baud_rate(),
                wait_for_ack: true,
                reconnect_interval: default_reconnect_interval(),
                connect_timeout: default_connect_timeout(),
                ack_timeout_ms: default_ack_timeout_ms(),
                ignore_devices: Vec::new(),
            },
            device_defaults: DeviceDefaults::default(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("rfbridge.log".to_string()),
            },
            devices: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[gateway]
host = "10.0.0.5"
port = 1234
wait_for_ack = false
ignore_devices = ["digitech_*"]

[device_defaults]
signal_repetitions = 2

[devices.newkaku_0000c6c2_1]
name = "Living room"
kind = "light"
aliases = ["newkaku_0000c6c2_2"]
fire_event = true

[devices.alectov1_0334_temp]
kind = "sensor"
signal_repetitions = 1
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.gateway.target().unwrap(),
            ConnectTarget::Tcp {
                host: "10.0.0.5".into(),
                port: 1234
            }
        );
        assert_eq!(config.gateway.reconnect_interval, 10);
        assert_eq!(config.gateway.baud_rate, 57600);
        assert!(config.bridge.automatic_add);
        assert!(config.gateway.link_settings().ignore.matches("digitech_0001_temp"));

        let devices = config.device_settings();
        assert_eq!(devices.len(), 2);
        let light = devices.iter().find(|d| d.kind == DeviceKind::Light).unwrap();
        assert_eq!(light.name(), "Living room");
        assert_eq!(light.signal_repetitions, 2);
        assert!(light.fire_event);
        let sensor = devices.iter().find(|d| d.kind == DeviceKind::Sensor).unwrap();
        assert_eq!(sensor.signal_repetitions, 1);
        assert!(!sensor.fire_event);
    }

    #[test]
    fn serial_target_and_numeric_string_port() {
        let mut gw = Config::default().gateway;
        assert_eq!(
            gw.target().unwrap(),
            ConnectTarget::Serial {
                path: "/dev/ttyACM0".into(),
                baud_rate: 57600
            }
        );
        gw.host = Some("gw.local".into());
        gw.port = Some(PortSpec::Path("1234".into()));
        assert!(matches!(gw.target().unwrap(), ConnectTarget::Tcp { port: 1234, .. }));
        gw.port = Some(PortSpec::Path("/dev/ttyACM0".into()));
        assert!(gw.target().is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.gateway.port = None;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.reconnect_interval = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device_defaults.signal_repetitions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.devices.insert(
            "x10_a1".into(),
            DeviceConfig {
                signal_repetitions: Some(0),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn default_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded.gateway.port, Some(PortSpec::Path("/dev/ttyACM0".into())));
        assert_eq!(loaded.logging.file.as_deref(), Some("rfbridge.log"));
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
