//! Owns the connection pool. The pool is created lazily at construction
//! time; the first real connection (the startup ping) happens inside the
//! container's start deadline.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use wirekit::{BuildCtx, ComposeError, Container, Dep, Hook};
use wirekit_bootstrap::Settings;

use crate::config::{DbConfigError, DbConnConfig};

static INSTALL_DRIVERS: std::sync::Once = std::sync::Once::new();

#[derive(Debug)]
pub struct DbManager {
    config: DbConnConfig,
    pool: AnyPool,
}

impl DbManager {
    /// Validate the config and build a lazy pool. No I/O happens here.
    pub fn connect_lazy(config: DbConnConfig) -> Result<Self, DbConfigError> {
        let config = config.defaulted();
        config.validate()?;
        let dsn = config.dsn()?;

        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        let pool = AnyPoolOptions::new()
            .max_connections(config.pool.max_conns)
            .min_connections(config.pool.min_conns)
            .acquire_timeout(config.pool.acquire_timeout)
            .idle_timeout(config.pool.idle_timeout)
            .max_lifetime(config.pool.max_lifetime)
            .connect_lazy(&dsn)
            .map_err(|e| DbConfigError::InvalidDsn {
                kind: config.kind,
                source: e.into(),
            })?;

        tracing::debug!(kind = %config.kind, "database pool created (lazy)");
        Ok(Self { config, pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn config(&self) -> &DbConnConfig {
        &self.config
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Provide [`DbManager`] from the `database.*` section of [`Settings`],
/// with a ping on start and a pool close on stop.
pub fn register(container: &mut Container) -> Result<(), ComposeError> {
    container.provide::<DbManager, _>(&[Dep::on::<Settings>()], |cx: &mut BuildCtx<'_>| {
        let settings = cx.get::<Settings>()?;
        let config: DbConnConfig = settings.section("database")?;
        let manager = DbManager::connect_lazy(config)?;

        let ping_pool = manager.pool.clone();
        let close_pool = manager.pool.clone();
        cx.append_hook(
            Hook::new()
                .on_start(move |_| async move {
                    sqlx::query("SELECT 1").execute(&ping_pool).await?;
                    tracing::info!("database reachable");
                    Ok(())
                })
                .on_stop(move |_| async move {
                    close_pool.close().await;
                    tracing::info!("database pool closed");
                    Ok(())
                }),
        );
        Ok(manager)
    })
}
