//! Bridge configuration and local state, stored as `config.json` and
//! `state.json` in the bridge data directory.

use crate::i18n::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use tradetrack_core::TerminalCredentials;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const CONFIG_FILE: &str = "config.json";
pub const STATE_FILE: &str = "state.json";

/// Keys a config posted by the web app must carry with a non-empty value.
pub const REQUIRED_KEYS: [&str; 6] = [
    "api_base_url",
    "sync_token",
    "trading_account_id",
    "mt5_login",
    "mt5_password",
    "mt5_server",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config not found: {0}. Run the bridge and connect from the web app (bridge section).")]
    NotFound(PathBuf),
    #[error("Missing: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("mt5_login must be a number")]
    InvalidLogin,
    #[error("Expected a JSON object")]
    NotAnObject,
    #[error("Failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Session and credential fields the bridge needs for a sync cycle.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BridgeConfig {
    pub api_base_url: String,
    pub sync_token: String,
    pub trading_account_id: String,
    pub mt5_login: i64,
    pub mt5_password: String,
    pub mt5_server: String,
    #[serde(default)]
    pub mt5_path: String,
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("api_base_url", &self.api_base_url)
            .field("sync_token", &"<redacted>")
            .field("trading_account_id", &self.trading_account_id)
            .field("mt5_login", &self.mt5_login)
            .field("mt5_password", &"<redacted>")
            .field("mt5_server", &self.mt5_server)
            .field("mt5_path", &self.mt5_path)
            .finish()
    }
}

impl BridgeConfig {
    /// Validate and normalize a config body posted by the web app.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| object.get(*key).map_or(true, is_blank))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let mt5_login = match &object["mt5_login"] {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or(ConfigError::InvalidLogin)?;

        Ok(Self {
            api_base_url: text(&object["api_base_url"]).trim_end_matches('/').to_string(),
            sync_token: text(&object["sync_token"]),
            trading_account_id: text(&object["trading_account_id"]),
            mt5_login,
            // Passwords may legitimately start or end with spaces.
            mt5_password: match &object["mt5_password"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            mt5_server: text(&object["mt5_server"]),
            mt5_path: object.get("mt5_path").map(text).unwrap_or_default(),
        })
    }

    pub fn mt5_path(&self) -> Option<&str> {
        Some(self.mt5_path.trim()).filter(|p| !p.is_empty())
    }

    pub fn terminal_credentials(&self) -> TerminalCredentials {
        TerminalCredentials::new(
            self.mt5_login,
            self.mt5_server.clone(),
            Zeroizing::new(self.mt5_password.clone()),
        )
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(true) => false,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Bridge-local state. `last_sync_at` is informational; the backend owns the
/// sync watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

/// The bridge data directory.
#[derive(Debug, Clone)]
pub struct BridgeFiles {
    dir: PathBuf,
}

impl BridgeFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the bridge executable, else the working directory.
    pub fn beside_executable() -> Self {
        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn has_config(&self) -> bool {
        self.config_path().is_file()
    }

    pub fn load_config(&self) -> Result<BridgeConfig, ConfigError> {
        let path = self.config_path();
        let content = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound(path.clone())
            } else {
                ConfigError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let content = Zeroizing::new(content);
        let value: Value = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Json { path, source })?;
        BridgeConfig::from_value(&value)
    }

    pub fn save_config(&self, config: &BridgeConfig) -> Result<(), ConfigError> {
        let json = Zeroizing::new(serde_json::to_string_pretty(config).map_err(|source| {
            ConfigError::Json {
                path: self.config_path(),
                source,
            }
        })?);
        self.write(&self.config_path(), &json)
    }

    /// Missing or unreadable state yields the defaults.
    pub fn load_state(&self) -> LocalState {
        let path = self.state_path();
        let Ok(content) = std::fs::read_to_string(&path) else {
            return LocalState::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable bridge state");
            LocalState::default()
        })
    }

    pub fn language(&self) -> Language {
        self.load_state().language.unwrap_or_default()
    }

    pub fn has_saved_language(&self) -> bool {
        self.load_state().language.is_some()
    }

    pub fn save_language(&self, language: Language) -> Result<(), ConfigError> {
        let mut state = self.load_state();
        state.language = Some(language);
        self.save_state(&state)
    }

    pub fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), ConfigError> {
        let mut state = self.load_state();
        state.last_sync_at = Some(at);
        self.save_state(&state)
    }

    fn save_state(&self, state: &LocalState) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(state).map_err(|source| ConfigError::Json {
            path: self.state_path(),
            source,
        })?;
        self.write(&self.state_path(), &json)
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        std::fs::write(path, content).map_err(io_err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn scratch_dir() -> BridgeFiles {
        let dir = format!("tradetrack-bridge-{}", uuid::Uuid::new_v4());
        BridgeFiles::new(std::env::temp_dir().join(dir))
    }

    pub(crate) fn posted_config() -> Value {
        json!({
            "api_base_url": "https://journal.example.com/",
            "sync_token": " token-123 ",
            "trading_account_id": 1,
            "mt5_login": "5001234",
            "mt5_password": " investor ",
            "mt5_server": "Broker-Demo",
        })
    }

    #[test]
    fn test_normalizes_posted_config() {
        let config = BridgeConfig::from_value(&posted_config()).unwrap();
        assert_eq!(config.api_base_url, "https://journal.example.com");
        assert_eq!(config.sync_token, "token-123");
        assert_eq!(config.trading_account_id, "1");
        assert_eq!(config.mt5_login, 5_001_234);
        assert_eq!(config.mt5_password, " investor ");
        assert_eq!(config.mt5_path(), None);
    }

    #[test]
    fn test_reports_every_missing_key() {
        let err = BridgeConfig::from_value(&json!({
            "api_base_url": "https://journal.example.com",
            "sync_token": "",
            "mt5_login": 0,
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing: sync_token, trading_account_id, mt5_login, mt5_password, mt5_server"
        );
    }

    #[test]
    fn test_rejects_non_numeric_login() {
        let mut body = posted_config();
        body["mt5_login"] = json!("abc");
        assert!(matches!(
            BridgeConfig::from_value(&body),
            Err(ConfigError::InvalidLogin)
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = BridgeConfig::from_value(&posted_config()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("token-123"));
        assert!(!debug.contains("investor"));
    }

    #[test]
    fn test_config_and_state_files() {
        let files = scratch_dir();
        assert!(matches!(files.load_config(), Err(ConfigError::NotFound(_))));
        assert_eq!(files.language(), Language::Uk);
        assert!(!files.has_saved_language());

        let config = BridgeConfig::from_value(&posted_config()).unwrap();
        files.save_config(&config).unwrap();
        assert!(files.has_config());
        assert_eq!(files.load_config().unwrap().mt5_login, 5_001_234);

        files.save_language(Language::En).unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        files.save_last_sync(at).unwrap();
        let state = files.load_state();
        assert_eq!(state.language, Some(Language::En));
        assert_eq!(state.last_sync_at, Some(at));

        std::fs::write(files.state_path(), "{not json").unwrap();
        assert_eq!(files.load_state(), LocalState::default());

        std::fs::remove_dir_all(files.dir()).unwrap();
    }
}
