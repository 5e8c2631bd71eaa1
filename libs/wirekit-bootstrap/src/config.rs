//! Layered configuration: serialized defaults, then a YAML file, then
//! `APP__`-prefixed environment variables. Later layers win.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration")]
    Load(#[from] Box<figment::Error>),

    #[error("failed to render configuration")]
    Render(#[from] serde_yaml::Error),
}

/// `app.*`: service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub name: String,
    pub port: u16,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "wirekit-api".to_string(),
            port: 8080,
        }
    }
}

/// `server.*`: HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// When true, a failed bind aborts startup instead of only being logged.
    pub fail_on_bind_error: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            fail_on_bind_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// `logging.*`: console output level and format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Typed view over the well-known sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// The merged configuration: a typed [`AppConfig`] for the core sections
/// plus a dynamic dotted-path accessor over the whole figment, so modules
/// can read their own sections without this crate knowing about them.
#[derive(Clone)]
pub struct Settings {
    figment: Figment,
    config: AppConfig,
}

impl Settings {
    /// Load defaults, then `config_path` (if given), then environment
    /// variables like `APP__SERVER__PORT=9090`.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = config_path {
            if !path.exists() {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("APP__").split("__"));

        let config: AppConfig = figment.extract().map_err(Box::new)?;
        Ok(Self { figment, config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Extract one named section into a module-owned config type.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        Ok(self.figment.extract_inner(key).map_err(Box::new)?)
    }

    pub fn get_str(&self, path: &str) -> Option<String> {
        self.figment.extract_inner(path).ok()
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.figment.extract_inner(path).ok()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.figment.extract_inner(path).ok()
    }

    pub fn str_or(&self, path: &str, default: &str) -> String {
        self.get_str(path).unwrap_or_else(|| default.to_string())
    }

    pub fn i64_or(&self, path: &str, default: i64) -> i64 {
        self.get_i64(path).unwrap_or(default)
    }

    pub fn bool_or(&self, path: &str, default: bool) -> bool {
        self.get_bool(path).unwrap_or(default)
    }

    /// CLI port override; wins over every layer.
    pub fn override_server_port(&mut self, port: u16) {
        self.config.server.port = port;
    }

    /// CLI verbosity override; wins over every layer.
    pub fn override_log_level(&mut self, level: &str) {
        self.config.logging.level = level.to_string();
    }

    /// Render the effective core configuration (for `--print-config`).
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(&self.config)?)
    }
}
