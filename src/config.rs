use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs, path::PathBuf};

use bridge_protocol::LogLevel;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::RESPONSE_TIMEOUT_CEILING;

pub const HOST_KEY: &str = "CARDBRIDGE_HOST";
pub const PORT_KEY: &str = "CARDBRIDGE_PORT";
pub const POLL_INTERVAL_KEY: &str = "CARDBRIDGE_POLL_INTERVAL_MS";
pub const RESPONSE_TIMEOUT_KEY: &str = "CARDBRIDGE_RESPONSE_TIMEOUT_SECS";
pub const SHUTDOWN_GRACE_KEY: &str = "CARDBRIDGE_SHUTDOWN_GRACE_MS";
pub const AUTO_CONNECT_KEY: &str = "CARDBRIDGE_AUTO_CONNECT";
pub const LOG_LEVEL_KEY: &str = "CARDBRIDGE_LOG_LEVEL";

/// Ceiling for `response_timeout_secs`.
pub const MAX_RESPONSE_TIMEOUT_SECS: u64 = RESPONSE_TIMEOUT_CEILING.as_secs();

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("could not persist {key}: {reason}")]
    Persist { key: String, reason: String },
}

#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys() {
            if let Some(value) = self.get(&key) {
                config.push((key, value));
            }
        }
        config
    }
    fn keys(&self) -> Vec<String>;
    fn get(&self, key: &str) -> Option<String>;
    fn del(&self, key: &str);
    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn into_inner(self) -> Box<dyn ConfigManagerType> {
        self.0
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from a `.env` file that `set`/`del` write back to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(err) => warn!(error = %err, "could not parse {}", env_file.display()),
            }
        } else {
            info!("no .env at {}, using process environment", env_file.display());
        }

        Box::new(Self { env_file })
    }

    fn rewrite_file(&self, key: &str, replacement: Option<&str>) -> std::io::Result<()> {
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;

        for line in content.lines() {
            match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    found = true;
                    if let Some(value) = replacement {
                        lines.push(format!("{key}={value}"));
                    }
                }
                _ => lines.push(line.to_string()),
            }
        }

        if let (false, Some(value)) = (found, replacement) {
            lines.push(format!("{key}={value}"));
        }

        fs::write(&self.env_file, lines.join("\n"))
    }
}

#[typetag::serde]
impl ConfigManagerType for EnvConfigManager {
    fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        unsafe {
            env::set_var(key, value);
        };
        self.rewrite_file(key, Some(value))
            .map_err(|e| ConfigError::Persist {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
        if self.env_file.exists() {
            let _ = self.rewrite_file(key, None);
        }
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory settings, for embedding and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }
}

#[typetag::serde]
impl ConfigManagerType for MapConfigManager {
    fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Everything the connection needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interface the protocol server binds.
    pub host: String,
    /// TCP port; 0 lets the OS pick one.
    pub port: u16,
    pub poll_interval_ms: u64,
    /// How long a tool call waits for the host thread.
    pub response_timeout_secs: u64,
    /// How long teardown waits for the server thread before detaching it.
    pub shutdown_grace_ms: u64,
    pub auto_connect_on_startup: bool,
    pub log_level: LogLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3141,
            poll_interval_ms: 25,
            response_timeout_secs: 30,
            shutdown_grace_ms: 5_000,
            auto_connect_on_startup: true,
            log_level: LogLevel::Info,
        }
    }
}

fn read_key<T>(manager: &ConfigManager, key: &str, parse: impl Fn(&str) -> Result<T, String>) -> Result<Option<T>, ConfigError> {
    match manager.0.get(key) {
        None => Ok(None),
        Some(raw) => parse(raw.trim())
            .map(Some)
            .map_err(|reason| ConfigError::InvalidValue {
                key: key.to_owned(),
                value: raw,
                reason,
            }),
    }
}

fn parse_from_str<T: FromStr>(raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| e.to_string())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected true or false".into()),
    }
}

impl BridgeConfig {
    /// Defaults overridden by whatever keys `manager` holds, then validated.
    pub fn load(manager: &ConfigManager) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = read_key(manager, HOST_KEY, |s| Ok(s.to_owned()))? {
            config.host = host;
        }
        if let Some(port) = read_key(manager, PORT_KEY, parse_from_str)? {
            config.port = port;
        }
        if let Some(ms) = read_key(manager, POLL_INTERVAL_KEY, parse_from_str)? {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = read_key(manager, RESPONSE_TIMEOUT_KEY, parse_from_str)? {
            config.response_timeout_secs = secs;
        }
        if let Some(ms) = read_key(manager, SHUTDOWN_GRACE_KEY, parse_from_str)? {
            config.shutdown_grace_ms = ms;
        }
        if let Some(auto) = read_key(manager, AUTO_CONNECT_KEY, parse_bool)? {
            config.auto_connect_on_startup = auto;
        }
        if let Some(level) = read_key(manager, LOG_LEVEL_KEY, parse_from_str::<LogLevel>)? {
            config.log_level = level;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, manager: &ConfigManager) -> Result<(), ConfigError> {
        for (key, value) in self.to_pairs() {
            manager.0.set(key, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        if self.response_timeout_secs == 0 {
            return Err(ConfigError::Invalid("response timeout must be positive".into()));
        }
        if self.response_timeout_secs > MAX_RESPONSE_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "response timeout ({} s) must not exceed {MAX_RESPONSE_TIMEOUT_SECS} s",
                self.response_timeout_secs
            )));
        }
        if self.poll_interval() >= self.response_timeout() {
            return Err(ConfigError::Invalid(format!(
                "poll interval ({} ms) must be shorter than the response timeout ({} s)",
                self.poll_interval_ms, self.response_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (HOST_KEY, self.host.clone()),
            (PORT_KEY, self.port.to_string()),
            (POLL_INTERVAL_KEY, self.poll_interval_ms.to_string()),
            (RESPONSE_TIMEOUT_KEY, self.response_timeout_secs.to_string()),
            (SHUTDOWN_GRACE_KEY, self.shutdown_grace_ms.to_string()),
            (AUTO_CONNECT_KEY, self.auto_connect_on_startup.to_string()),
            (LOG_LEVEL_KEY, self.log_level.to_string()),
        ]
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn bind_addr(&self) -> String {
        let host = self.host.trim();
        match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{host}:{}", self.port),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::{TempDir, tempdir};

    fn map_manager(pairs: &[(&str, &str)]) -> ConfigManager {
        let mgr = MapConfigManager::new();
        for (k, v) in pairs {
            mgr.set(k, v).unwrap();
        }
        ConfigManager(mgr)
    }

    #[test]
    fn test_map_config_manager_basic() {
        let mgr = MapConfigManager::new();

        mgr.set("foo", "bar").unwrap();
        assert_eq!(mgr.get("foo"), Some("bar".to_string()));

        mgr.set("foo", "baz").unwrap();
        assert_eq!(mgr.get("foo"), Some("baz".to_string()));

        assert_eq!(mgr.keys(), vec!["foo".to_string()]);

        mgr.del("foo");
        assert_eq!(mgr.get("foo"), None);
    }

    #[test]
    fn test_map_config_manager_as_vec() {
        let mgr = MapConfigManager::new();
        mgr.set("a", "1").unwrap();
        mgr.set("b", "2").unwrap();

        let mut config = mgr.as_vec();
        config.sort();

        assert_eq!(
            config,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_env_config_manager_set_and_delete() {
        let key = "CARDBRIDGE_TEST_SET_AND_DELETE";
        let tmp = TempDir::new().unwrap();
        let env = tmp.path().join(".env");

        let mgr = EnvConfigManager::new(env.clone());
        mgr.set(key, "secret").unwrap();
        assert_eq!(std::env::var(key).ok(), Some("secret".to_string()));
        assert!(fs::read_to_string(&env).unwrap().contains(&format!("{key}=secret")));

        mgr.del(key);
        assert_eq!(std::env::var(key).ok(), None);
        assert!(!fs::read_to_string(&env).unwrap().contains(key));
    }

    #[test]
    fn test_env_config_manager_with_temp_env_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        write(&env_path, "CARDBRIDGE_TEST_FILE_PORT=4000\nOTHER=1\n").unwrap();

        let mgr = EnvConfigManager::new(env_path);
        assert_eq!(
            mgr.get("CARDBRIDGE_TEST_FILE_PORT"),
            Some("4000".to_string())
        );
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::load(&map_manager(&[])).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.bind_addr(), "127.0.0.1:3141");
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn keys_override_defaults() {
        let config = BridgeConfig::load(&map_manager(&[
            (PORT_KEY, "0"),
            (AUTO_CONNECT_KEY, "off"),
            (LOG_LEVEL_KEY, "DEBUG"),
            (RESPONSE_TIMEOUT_KEY, " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.port, 0);
        assert!(!config.auto_connect_on_startup);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.response_timeout_secs, 5);
    }

    #[test]
    fn bad_values_name_their_key() {
        let err = BridgeConfig::load(&map_manager(&[(PORT_KEY, "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == PORT_KEY));

        let err = BridgeConfig::load(&map_manager(&[(AUTO_CONNECT_KEY, "maybe")])).unwrap_err();
        assert!(err.to_string().contains(AUTO_CONNECT_KEY));
    }

    #[test]
    fn validate_rejects_inconsistent_settings() {
        let bad = [
            BridgeConfig {
                poll_interval_ms: 0,
                ..Default::default()
            },
            BridgeConfig {
                response_timeout_secs: 0,
                ..Default::default()
            },
            BridgeConfig {
                poll_interval_ms: 2_000,
                response_timeout_secs: 1,
                ..Default::default()
            },
            BridgeConfig {
                host: "  ".into(),
                ..Default::default()
            },
            BridgeConfig {
                response_timeout_secs: MAX_RESPONSE_TIMEOUT_SECS + 1,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn save_then_load_keeps_values() {
        let manager = map_manager(&[]);
        let config = BridgeConfig {
            port: 4242,
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        config.save(&manager).unwrap();
        assert_eq!(BridgeConfig::load(&manager).unwrap(), config);
    }

    #[test]
    fn huge_response_timeout_is_rejected() {
        let err = BridgeConfig::load(&map_manager(&[(RESPONSE_TIMEOUT_KEY, "18446744073709551615")]))
            .unwrap_err();
        assert!(err.to_string().contains("must not exceed"), "{err}");

        let ceiling = BridgeConfig {
            response_timeout_secs: MAX_RESPONSE_TIMEOUT_SECS,
            ..Default::default()
        };
        assert!(ceiling.validate().is_ok());
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let config = BridgeConfig {
            host: "::1".into(),
            port: 4000,
            ..Default::default()
        };
        assert_eq!(config.bind_addr(), "[::1]:4000");
        assert!(config.bind_addr().parse::<SocketAddr>().is_ok());

        let named = BridgeConfig {
            host: "localhost".into(),
            ..Default::default()
        };
        assert_eq!(named.bind_addr(), "localhost:3141");
    }
}
