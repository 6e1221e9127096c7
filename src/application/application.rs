// This is where we will define the core application and all the related
// things on how to startup the application

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::compression::cache::CompressionCache;
use crate::compression::compressor::Compressor;
use crate::compression::tracer::TraceSink;
use crate::db::sqlite::init_sqlite_db;
use crate::llm::broker::LLMBroker;

use super::config::configuration::{ConfigError, Configuration};

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Debug, thiserror::Error)]
pub enum ApplicationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cache store failed to open: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("no transport registered for the configured provider")]
    MissingProvider,
}

pub struct Application {
    pub config: Arc<Configuration>,
    pub cache: Arc<CompressionCache>,
    pub compressor: Arc<Compressor>,
}

impl Application {
    /// Wire the whole stack together: sqlite-backed cache, the transport for
    /// the configured provider and the compressor on top. Fails fast when
    /// the configuration cannot name a model.
    pub async fn initialize(
        config: Configuration,
        tracer: Arc<dyn TraceSink>,
    ) -> Result<Self, ApplicationError> {
        let config = Arc::new(config);
        // surfaces MissingDefaultModel before any work happens
        config.model()?;

        let sql_db = init_sqlite_db(&config.cache_dir).await?;
        let cache = Arc::new(CompressionCache::new(sql_db));

        let broker = LLMBroker::new();
        let llm_client = broker
            .get_client(&config.provider)
            .map_err(|_| ApplicationError::MissingProvider)?;

        let compressor = Arc::new(Compressor::new(&config, llm_client, cache.clone(), tracer)?);

        Ok(Self {
            config,
            cache,
            compressor,
        })
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !super::logging::tracing::tracing_subscribe(config) {
            warn!("Failed to install tracing_subscriber. There's probably one already...");
        };

        LOGGER_INSTALLED.set(true).unwrap();
    }
}
