use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    /// Echo log lines to stderr as well as the file (text mode only)
    #[serde(default = "default_true")]
    pub log_to_console: bool,
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            use_json: false,
            rotation: default_rotation(),
            log_to_console: true,
            exchange: ExchangeConfig::default(),
        }
    }
}

/// Coordinator tuning
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ExchangeConfig {
    pub lock_timeout_ms: u64,
    pub commit_timeout_ms: u64,
    pub session_ttl_secs: u64,
    /// Points issued to every new user; 0 disables the bonus
    pub signup_bonus: u64,
    pub max_message_len: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2000,
            commit_timeout_ms: 2000,
            session_ttl_secs: 86_400,
            signup_bonus: 0,
            max_message_len: 500,
        }
    }
}

impl ExchangeConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "exchange.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = AppConfig::parse("log_level: debug\nexchange:\n  signup_bonus: 50\n").unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.rotation, "daily");
        assert_eq!(config.exchange.signup_bonus, 50);
        assert_eq!(config.exchange.lock_timeout(), Duration::from_millis(2000));
        assert_eq!(config.exchange.max_message_len, 500);
    }

    #[test]
    fn test_empty_exchange_section() {
        let config = AppConfig::parse("use_json: true\n").unwrap();
        assert!(config.use_json);
        assert_eq!(config.exchange, ExchangeConfig::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load("definitely-not-an-env").is_err());
    }
}
