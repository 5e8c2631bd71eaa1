//! Config-driven database access: backend selection, DSN construction,
//! pool sizing and lifecycle integration.

pub mod config;
pub mod manager;

pub use config::{DbConfigError, DbConnConfig, DbKind, PoolCfg};
pub use manager::{register, DbManager};
