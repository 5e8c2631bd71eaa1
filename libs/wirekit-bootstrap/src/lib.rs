//! Process-level plumbing shared by wirekit binaries: layered
//! configuration, logging init and signal handling.

pub mod config;
pub mod logging;
pub mod signals;

pub use config::{AppConfig, AppInfo, ConfigError, LogFormat, LoggingConfig, ServerConfig, Settings};
