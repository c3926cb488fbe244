//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::websocket::{HeartbeatSettings, SessionSettings};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served for the browser client
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// How long open sessions get to close on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Chat session limits and timers
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_username_chars")]
    pub max_username_chars: usize,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Frames a connection may have queued before it counts as stalled
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_max_username_chars() -> usize {
    20
}

fn default_max_message_chars() -> usize {
    1000
}

fn default_auth_timeout() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    10
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_username_chars: default_max_username_chars(),
            max_message_chars: default_max_message_chars(),
            auth_timeout_secs: default_auth_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl ChatConfig {
    /// Per-connection settings; zero durations and buffers are raised to
    /// their smallest usable value
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_username_chars: self.max_username_chars,
            max_message_chars: self.max_message_chars,
            auth_timeout: Duration::from_secs(self.auth_timeout_secs.max(1)),
            heartbeat: HeartbeatSettings {
                interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
                timeout: Duration::from_secs(self.heartbeat_timeout_secs.max(1)),
            },
            outbound_buffer: self.outbound_buffer.max(1),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("chatter").join("config.toml")),
            Some(PathBuf::from("/etc/chatter/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Server overrides; bare PORT is honoured for drop-in deployments
        if let Ok(host) = std::env::var("CHATTER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("PORT") {
            self.server.port = port;
        }
        if let Some(port) = env_parse("CHATTER_PORT") {
            self.server.port = port;
        }
        if let Ok(dir) = std::env::var("CHATTER_STATIC_DIR") {
            self.server.static_dir = dir;
        }

        // Chat overrides
        if let Some(secs) = env_parse("CHATTER_AUTH_TIMEOUT_SECS") {
            self.chat.auth_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("CHATTER_HEARTBEAT_INTERVAL_SECS") {
            self.chat.heartbeat_interval_secs = secs;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("CHATTER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CHATTER_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Chatter Configuration
#
# Environment variables override these settings:
# - CHATTER_HOST
# - CHATTER_PORT (or PORT)
# - CHATTER_STATIC_DIR
# - CHATTER_AUTH_TIMEOUT_SECS
# - CHATTER_HEARTBEAT_INTERVAL_SECS
# - CHATTER_LOG_LEVEL
# - CHATTER_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port
port = 3000

# Directory with the browser client
static_dir = "public"

# Seconds open sessions get to close on shutdown
shutdown_grace_secs = 10

[chat]
# Maximum username length (characters)
max_username_chars = 20

# Maximum message length (characters)
max_message_chars = 1000

# Seconds a new connection has to send a valid join
auth_timeout_secs = 30

# Seconds between heartbeat pings
heartbeat_interval_secs = 30

# Seconds to wait for a pong before the connection is dropped
heartbeat_timeout_secs = 10

# Frames a connection may have queued before it counts as stalled
outbound_buffer = 256

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.addr(), "0.0.0.0:3000");
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(config.chat.max_username_chars, 20);
        assert_eq!(config.chat.max_message_chars, 1000);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();

        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.server.static_dir, defaults.server.static_dir);
        assert_eq!(config.chat.auth_timeout_secs, defaults.chat.auth_timeout_secs);
        assert_eq!(config.chat.outbound_buffer, defaults.chat.outbound_buffer);
        assert_eq!(config.logging.level, defaults.logging.level);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8080\n\n[chat]\nauth_timeout_secs = 5").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.chat.auth_timeout_secs, 5);
        assert_eq!(config.chat.max_message_chars, 1000);
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_session_settings_clamp_zero() {
        let chat = ChatConfig {
            auth_timeout_secs: 0,
            heartbeat_interval_secs: 0,
            outbound_buffer: 0,
            ..ChatConfig::default()
        };
        let settings = chat.session_settings();

        assert_eq!(settings.auth_timeout, Duration::from_secs(1));
        assert_eq!(settings.heartbeat.interval, Duration::from_secs(1));
        assert_eq!(settings.outbound_buffer, 1);
    }
}
