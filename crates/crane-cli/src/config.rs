//! Service configuration – `~/.crane/config.toml` plus environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crane_middleware::MqttSettings;
use crane_twin::DEFAULT_CHANNEL_CAPACITY;
use crane_types::CraneError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A broker password. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket port of the API server.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,

    #[serde(default = "default_cmd_topic")]
    pub cmd_topic: String,

    #[serde(default = "default_state_topic")]
    pub state_topic: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("cmd_topic", &self.cmd_topic)
            .field("state_topic", &self.state_topic)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("reconnect_period_ms", &self.reconnect_period_ms)
            .field("client_id_prefix", &self.client_id_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Frames buffered per realtime client before frames are dropped for it.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_api_port() -> u16 {
    3000
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_cmd_topic() -> String {
    "lights/cmd".to_string()
}
fn default_state_topic() -> String {
    "lights/state".to_string()
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_reconnect_period_ms() -> u64 {
    2000
}
fn default_client_id_prefix() -> String {
    "crane-api".to_string()
}
fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            mqtt: MqttConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            cmd_topic: default_cmd_topic(),
            state_topic: default_state_topic(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_period_ms: default_reconnect_period_ms(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Broker settings for [`crane_middleware::MqttBus::connect`].
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            username: self.mqtt.username.clone(),
            password: self
                .mqtt
                .password
                .as_ref()
                .map(|p| Zeroizing::new(p.expose().to_string())),
            client_id_prefix: self.mqtt.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            reconnect_period: Duration::from_millis(self.mqtt.reconnect_period_ms),
            state_topic: self.mqtt.state_topic.clone(),
        }
    }
}

/// `$CRANE_CONFIG`, or `~/.crane/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CRANE_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".crane").join("config.toml")
}

/// Load the config file (defaults when it does not exist) and apply
/// environment overrides.
pub fn load() -> Result<Config, CraneError> {
    let mut cfg = load_from(&config_path())?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load a specific file. A missing file yields [`Config::default`].
pub(crate) fn load_from(path: &Path) -> Result<Config, CraneError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        CraneError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    toml::from_str(&raw).map_err(|e| {
        CraneError::Config(format!("failed to parse config at {}: {e}", path.display()))
    })
}

/// Apply deployment environment variables to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `API_PORT` | `api_port` |
/// | `MQTT_HOST` | `mqtt.host` |
/// | `MQTT_PORT` | `mqtt.port` |
/// | `MQTT_USERNAME` | `mqtt.username` |
/// | `MQTT_PASSWORD` | `mqtt.password` |
/// | `MQTT_CMD_TOPIC` | `mqtt.cmd_topic` |
/// | `MQTT_STATE_TOPIC` | `mqtt.state_topic` |
///
/// Ports that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("API_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.api_port = port;
    }
    if let Ok(v) = std::env::var("MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Ok(v) = std::env::var("MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("MQTT_USERNAME") {
        cfg.mqtt.username = Some(v);
    }
    if let Ok(v) = std::env::var("MQTT_PASSWORD") {
        cfg.mqtt.password = Some(Secret::new(v));
    }
    if let Ok(v) = std::env::var("MQTT_CMD_TOPIC") {
        cfg.mqtt.cmd_topic = v;
    }
    if let Ok(v) = std::env::var("MQTT_STATE_TOPIC") {
        cfg.mqtt.state_topic = v;
    }
}
