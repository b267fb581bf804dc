//! Relay configuration – `~/.parkrelay/config.toml` plus `PARKRELAY_*`
//! environment overrides.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! The intent endpoint and project id are taken as given; nothing is
//! validated at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parkrelay_middleware::{BrokerConfig, ReconnectPolicy};
use parkrelay_runtime::SessionScope;
use parkrelay_types::{DEFAULT_LANGUAGE_CODE, RelayError, Topics};
use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket port for browser clients.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether all clients share one intent conversation.
    #[serde(default)]
    pub session_scope: SessionScope,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub intent: IntentSection,
}

/// `[broker]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Reconnect with exponential backoff after a connection error.  When
    /// `false` the first error closes the broker link for good.
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_max_attempts: Option<u32>,
    #[serde(default)]
    pub topics: Topics,
}

/// `[intent]` table.
#[derive(Clone, Serialize, Deserialize)]
pub struct IntentSection {
    #[serde(default = "default_intent_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    /// OAuth bearer token.  Users should restrict permissions on the config
    /// file when this is set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    /// Per-call timeout; unset means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for IntentSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentSection")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("language_code", &self.language_code)
            .field(
                "access_token",
                if self.access_token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_port() -> u16 {
    3000
}
fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "parkrelay".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_reconnect_initial_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_intent_endpoint() -> String {
    "https://dialogflow.googleapis.com".to_string()
}
fn default_language_code() -> String {
    DEFAULT_LANGUAGE_CODE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            session_scope: SessionScope::default(),
            broker: BrokerSection::default(),
            intent: IntentSection::default(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect: true,
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_attempts: None,
            topics: Topics::default(),
        }
    }
}

impl Default for IntentSection {
    fn default() -> Self {
        Self {
            endpoint: default_intent_endpoint(),
            project_id: String::new(),
            language_code: default_language_code(),
            access_token: String::new(),
            timeout_secs: None,
        }
    }
}

impl BrokerSection {
    /// Translate the file section into the middleware's connection settings.
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            topics: self.topics.clone(),
            reconnect: ReconnectPolicy {
                enabled: self.reconnect,
                initial_delay: Duration::from_millis(self.reconnect_initial_ms),
                max_delay: Duration::from_millis(self.reconnect_max_ms),
                max_attempts: self.reconnect_max_attempts,
            },
        }
    }
}

/// `$PARKRELAY_CONFIG`, or `~/.parkrelay/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("PARKRELAY_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".parkrelay").join("config.toml")
}

/// Read a config file.  Returns `None` if it does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, RelayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| RelayError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Write `cfg` to `path`, creating the parent directory.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), RelayError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RelayError::Config(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RelayError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| RelayError::Config(format!("failed to write {}: {e}", path.display())))
}

/// Apply `PARKRELAY_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PARKRELAY_PORT` | `port` |
/// | `PARKRELAY_SESSION_SCOPE` | `session_scope` |
/// | `PARKRELAY_BROKER_HOST` | `broker.host` |
/// | `PARKRELAY_BROKER_PORT` | `broker.port` |
/// | `PARKRELAY_INTENT_ENDPOINT` | `intent.endpoint` |
/// | `PARKRELAY_PROJECT_ID` | `intent.project_id` |
/// | `PARKRELAY_ACCESS_TOKEN` | `intent.access_token` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(port) = env_parse("PARKRELAY_PORT") {
        cfg.port = port;
    }
    if let Some(scope) = env_parse("PARKRELAY_SESSION_SCOPE") {
        cfg.session_scope = scope;
    }
    if let Ok(v) = std::env::var("PARKRELAY_BROKER_HOST") {
        cfg.broker.host = v;
    }
    if let Some(port) = env_parse("PARKRELAY_BROKER_PORT") {
        cfg.broker.port = port;
    }
    if let Ok(v) = std::env::var("PARKRELAY_INTENT_ENDPOINT") {
        cfg.intent.endpoint = v;
    }
    if let Ok(v) = std::env::var("PARKRELAY_PROJECT_ID") {
        cfg.intent.project_id = v;
    }
    if let Ok(v) = std::env::var("PARKRELAY_ACCESS_TOKEN") {
        cfg.intent.access_token = v;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.broker.host, "localhost");
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.session_scope, SessionScope::PerConnection);
        assert_eq!(cfg.intent.language_code, "en");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");

        assert_eq!(loaded.port, 3000);
        assert_eq!(loaded.broker.topics, Topics::default());
        assert!(loaded.broker.reconnect);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
session_scope = "shared"

[broker]
reconnect = false

[broker.topics]
gate = "lot7/gate"

[intent]
project_id = "parking-bot"
"#,
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.session_scope, SessionScope::Shared);
        assert!(!cfg.broker.reconnect);
        assert_eq!(cfg.broker.topics.gate, "lot7/gate");
        assert_eq!(cfg.broker.topics.slots, "parking/slots");
        assert_eq!(cfg.intent.project_id, "parking-bot");
        assert_eq!(cfg.intent.endpoint, "https://dialogflow.googleapis.com");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(load_from(&path), Err(RelayError::Config(_))));
    }

    #[test]
    fn broker_section_maps_to_reconnect_policy() {
        let section = BrokerSection {
            reconnect: false,
            reconnect_max_attempts: Some(5),
            ..BrokerSection::default()
        };
        let broker = section.to_broker_config();
        assert!(!broker.reconnect.enabled);
        assert_eq!(broker.reconnect.max_attempts, Some(5));
        assert_eq!(broker.keep_alive, Duration::from_secs(30));
    }

    #[test]
    fn debug_redacts_access_token() {
        let mut cfg = Config::default();
        cfg.intent.access_token = "ya29.secret".to_string();
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("ya29.secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_token() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn config_path_points_to_parkrelay_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".parkrelay"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn env_overrides_change_project_and_endpoint() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("PARKRELAY_PROJECT_ID", "lot-7");
            std::env::set_var("PARKRELAY_INTENT_ENDPOINT", "http://127.0.0.1:9000");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.intent.project_id, "lot-7");
        assert_eq!(cfg.intent.endpoint, "http://127.0.0.1:9000");
        unsafe {
            std::env::remove_var("PARKRELAY_PROJECT_ID");
            std::env::remove_var("PARKRELAY_INTENT_ENDPOINT");
        }
    }

    #[test]
    fn env_override_ignores_invalid_broker_port() {
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("PARKRELAY_BROKER_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.broker.port, 1883);
        unsafe { std::env::remove_var("PARKRELAY_BROKER_PORT") };
    }

    #[test]
    fn env_override_sets_session_scope() {
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("PARKRELAY_SESSION_SCOPE", "shared") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.session_scope, SessionScope::Shared);
        unsafe { std::env::remove_var("PARKRELAY_SESSION_SCOPE") };
    }
}
