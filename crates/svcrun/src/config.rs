//! Router connection settings, read from TOML.
//!
//! ```toml
//! [router]
//! enabled = true
//! host = "127.0.0.1"
//! port = 8181
//! reconnect_ms = 500
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io { path: path.to_path_buf(), message: e.to_string() })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse { message: e.to_string() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

impl RouterConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8181
}

fn default_reconnect_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "Failed to read config file {}: {}", path.display(), message),
            Self::Parse { message } => write!(f, "Failed to parse config: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.router.enabled);
        assert_eq!(config.router.host, "127.0.0.1");
        assert_eq!(config.router.port, 8181);
        assert_eq!(config.router.reconnect_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config = Config::parse("[router]\nport = 9000\n").unwrap();
        assert_eq!(config.router.port, 9000);
        assert_eq!(config.router.host, "127.0.0.1");
        assert!(config.router.enabled);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::parse("").unwrap().router, RouterConfig::default());
    }

    #[test]
    fn test_bad_type_is_parse_error() {
        assert!(matches!(Config::parse("[router]\nport = \"x\"\n"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::from_file(Path::new("/nonexistent/router.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
