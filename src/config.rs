//! Operator configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SORTLINK_CONFIG)
//! 3. Environment variables
//! 4. Command-line flags (applied by `main`)

use serde::{Deserialize, Serialize};
use sortlink_client::{ConnectionConfig, SessionConfig};
use sortlink_protocol::{TextByteOrder, DEFAULT_CONTROL_PORT, DEFAULT_FEED_PORT};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control endpoint.
    pub control: EndpointConfig,
    /// Event feed endpoint.
    pub feed: EndpointConfig,
    /// Control session tuning.
    pub session: SessionSettings,
    /// Wire handling shared by both endpoints.
    pub wire: WireSettings,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SORTLINK_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default_endpoints(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
    }

    fn from_yaml(content: &str) -> Result<Self, String> {
        let mut config: Config = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        // An omitted port means the endpoint's well-known port.
        if config.control.port == 0 {
            config.control.port = DEFAULT_CONTROL_PORT;
        }
        if config.feed.port == 0 {
            config.feed.port = DEFAULT_FEED_PORT;
        }
        Ok(config)
    }

    fn default_endpoints() -> Self {
        Self {
            control: EndpointConfig::with_port(DEFAULT_CONTROL_PORT),
            feed: EndpointConfig::with_port(DEFAULT_FEED_PORT),
            ..Default::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        self.control.apply_env_overrides("SORTLINK_CONTROL");
        self.feed.apply_env_overrides("SORTLINK_FEED");
        self.session.apply_env_overrides();
    }

    /// Connection settings for the control endpoint.
    pub fn control_connection(&self) -> ConnectionConfig {
        self.wire.apply(ConnectionConfig::new(&self.control.host, self.control.port))
    }

    /// Connection settings for the event feed endpoint.
    pub fn feed_connection(&self) -> ConnectionConfig {
        self.wire.apply(ConnectionConfig::new(&self.feed.host, self.feed.port))
    }
}

/// One appliance endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl EndpointConfig {
    fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        if let Ok(host) = std::env::var(format!("{}_HOST", prefix)) {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var(format!("{}_PORT", prefix)) {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
    }
}

/// Control session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Pause after each directory probe, in milliseconds.
    pub probe_delay_ms: u64,
    /// Probes allowed before the session fails.
    pub max_probe_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            probe_delay_ms: defaults.probe_delay.as_millis() as u64,
            max_probe_attempts: defaults.max_probe_attempts,
        }
    }
}

impl SessionSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(delay) = std::env::var("SORTLINK_PROBE_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.probe_delay_ms = ms;
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_probe_delay(Duration::from_millis(self.probe_delay_ms))
            .with_max_probe_attempts(self.max_probe_attempts)
    }
}

/// Text section byte order, as written in YAML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextOrder {
    #[default]
    Reversed,
    Wire,
}

impl From<TextOrder> for TextByteOrder {
    fn from(order: TextOrder) -> Self {
        match order {
            TextOrder::Reversed => TextByteOrder::Reversed,
            TextOrder::Wire => TextByteOrder::Wire,
        }
    }
}

/// Wire handling shared by both endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireSettings {
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Byte order applied to text sections.
    pub text_order: TextOrder,
    /// Enforce the outbound signature on inbound frames.
    pub strict_signature: bool,
}

impl Default for WireSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            text_order: TextOrder::default(),
            strict_signature: false,
        }
    }
}

impl WireSettings {
    fn apply(&self, config: ConnectionConfig) -> ConnectionConfig {
        let config = config
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_text_byte_order(self.text_order.into());
        if self.strict_signature {
            config.with_expected_signature(sortlink_protocol::SIGNATURE)
        } else {
            config
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let config = Config::default_endpoints();
        assert_eq!(config.control.port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.feed.port, DEFAULT_FEED_PORT);
        assert_eq!(config.session.max_probe_attempts, 10);
        assert_eq!(config.session.probe_delay_ms, 1000);
        assert_eq!(config.wire.text_order, TextOrder::Reversed);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "control:\n  host: sorter-3\nwire:\n  text_order: wire\n";
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.control.host, "sorter-3");
        assert_eq!(config.control.port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.feed.host, "127.0.0.1");
        assert_eq!(config.feed.port, DEFAULT_FEED_PORT);

        let conn = config.control_connection();
        assert_eq!(conn.addr(), format!("sorter-3:{}", DEFAULT_CONTROL_PORT));
        assert_eq!(conn.text_byte_order, TextByteOrder::Wire);
        assert!(conn.expected_signature.is_none());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default_endpoints();
        config.wire.strict_signature = true;
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();

        assert_eq!(parsed.control.port, config.control.port);
        assert!(parsed.feed_connection().expected_signature.is_some());
    }

    #[test]
    fn test_session_config() {
        let settings = SessionSettings {
            probe_delay_ms: 0,
            max_probe_attempts: 3,
        };
        let session = settings.session_config();
        assert_eq!(session.probe_delay, Duration::ZERO);
        assert_eq!(session.max_probe_attempts, 3);
    }
}
