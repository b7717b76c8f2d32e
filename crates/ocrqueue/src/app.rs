//! Wiring of store, service and worker pool from one [`Config`].

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::service::JobService;
use crate::store::JobStore;
use crate::worker::{JobRunner, PoolSettings, WorkerPool};

pub struct App {
    config: Config,
    store: JobStore,
    service: JobService,
}

impl App {
    /// Opens (and migrates) the configured database.
    pub fn open(config: Config) -> Result<Self> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            })?;
        let store = JobStore::new(Database::open(&path)?);
        info!(path = %path.display(), "Opened job database");
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: JobStore) -> Self {
        let service = JobService::from_config(store.clone(), &config);
        Self {
            config,
            store,
            service,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    /// Builds the configured backends and starts the worker pool.
    pub async fn start_pool(&self) -> Result<WorkerPool> {
        let runner = JobRunner::from_config(self.store.clone(), &self.config)?;
        let pool = WorkerPool::start(Arc::new(runner), PoolSettings::from_config(&self.config)).await?;
        Ok(pool)
    }
}
