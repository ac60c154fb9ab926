use crate::{
    resolve_dialect, DbExecutionRepository, Error, ExecutionIncrementer,
    ExecutionRepository, InMemoryExecutionRepository, Result,
};
use serde::Deserialize;
use sqlx::any::AnyPoolOptions;
use std::sync::{Arc, Once};
use tokio::sync::OnceCell;

/// Table-name prefix used when the configuration does not set one.
pub const DEFAULT_TABLE_PREFIX: &str = "TASK_";

static INSTALL_DRIVERS: Once = Once::new();

/// Register the sqlx Any drivers. Safe to call more than once; the factory
/// calls it before connecting.
pub fn install_drivers() {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
}

fn default_table_prefix() -> String {
    DEFAULT_TABLE_PREFIX.to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// Backing-store configuration, supplied by the embedding application.
/// Without a database url the factory hands out the in-memory repository.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Refuse to fall back to the in-memory repository.
    #[serde(default)]
    pub require_persistent: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            table_prefix: default_table_prefix(),
            max_connections: default_max_connections(),
            require_persistent: false,
        }
    }
}

impl StoreConfig {
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: Some(database_url.into()),
            ..Self::default()
        }
    }
}

/// Builds the execution repository for a configuration and caches it, so
/// repeated calls return the same instance without re-probing the store.
///
/// All resolution (dialect probe, sequence-existence probe) happens once,
/// inside the first `repository()` call.
pub struct RepositoryFactory {
    config: StoreConfig,
    repository: OnceCell<Arc<dyn ExecutionRepository>>,
}

impl RepositoryFactory {
    pub fn new(config: StoreConfig) -> Result<Self> {
        if config.table_prefix.trim().is_empty() {
            return Err(Error::Configuration(
                "table prefix must not be empty".to_string(),
            ));
        }
        if config.require_persistent && config.database_url.is_none() {
            return Err(Error::Configuration(
                "persistent repository requires a database url".to_string(),
            ));
        }

        Ok(Self {
            config,
            repository: OnceCell::new(),
        })
    }

    /// Factory for the in-memory repository. Testing use only.
    pub fn in_memory() -> Self {
        Self {
            config: StoreConfig::default(),
            repository: OnceCell::new(),
        }
    }

    pub async fn repository(&self) -> Result<Arc<dyn ExecutionRepository>> {
        let repository = self.repository.get_or_try_init(|| self.build()).await?;
        Ok(Arc::clone(repository))
    }

    async fn build(&self) -> Result<Arc<dyn ExecutionRepository>> {
        let Some(url) = self.config.database_url.as_deref() else {
            tracing::warn!("No database url configured, using the in-memory repository");
            return Ok(Arc::new(InMemoryExecutionRepository::new()));
        };

        install_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect(url)
            .await?;

        let mut conn = pool.acquire().await?;
        let dialect = resolve_dialect(&mut conn).await?;
        drop(conn);

        tracing::info!("Resolved database dialect: {}", dialect);

        let incrementer = ExecutionIncrementer::resolve(
            &pool,
            dialect,
            format!("{}SEQ", self.config.table_prefix),
        )
        .await?;

        let repository = DbExecutionRepository::new(
            pool,
            dialect,
            self.config.table_prefix.clone(),
            incrementer,
        );

        Ok(Arc::new(repository))
    }
}
