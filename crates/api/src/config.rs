//! Backend settings, read from an optional TOML file and overridden by
//! command-line flags or environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub database_url: Option<String>,
    pub encryption_key_fernet: Option<String>,
    pub jwt_secret_key: Option<String>,
    pub jwt_algorithm: String,
    /// Terminal call timeout in milliseconds.
    pub mt5_timeout: u64,
    pub mt5_path: Option<String>,
    pub mt5_terminal_host: String,
    pub mt5_terminal_port: u16,
    pub api_host: String,
    pub api_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            encryption_key_fernet: None,
            jwt_secret_key: None,
            jwt_algorithm: "HS256".to_string(),
            mt5_timeout: 30_000,
            mt5_path: None,
            mt5_terminal_host: "127.0.0.1".to_string(),
            mt5_terminal_port: 5556,
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
        }
    }
}

impl ServerSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Settings from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn terminal_timeout(&self) -> Duration {
        Duration::from_millis(self.mt5_timeout)
    }

    pub fn encryption_key(&self) -> Result<&str, ConfigError> {
        required(&self.encryption_key_fernet, "ENCRYPTION_KEY_FERNET")
    }

    pub fn jwt_secret(&self) -> Result<&str, ConfigError> {
        required(&self.jwt_secret_key, "JWT_SECRET_KEY")
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        required(&self.database_url, "DATABASE_URL")
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}
