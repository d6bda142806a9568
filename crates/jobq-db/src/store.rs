//! Bundle of repositories sharing one pool.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    ControlRepo, JobRepo, SettingsRepo, SqliteControlRepo, SqliteJobRepo, SqliteSettingsRepo,
    SqliteWorkerRepo, WorkerRepo,
};

/// Handles to every record type in the store.
#[derive(Clone)]
pub struct Store {
    pub jobs: Arc<dyn JobRepo>,
    pub workers: Arc<dyn WorkerRepo>,
    pub control: Arc<dyn ControlRepo>,
    pub settings: Arc<dyn SettingsRepo>,
}

impl Store {
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            jobs: Arc::new(SqliteJobRepo::new(pool.clone())),
            workers: Arc::new(SqliteWorkerRepo::new(pool.clone())),
            control: Arc::new(SqliteControlRepo::new(pool.clone())),
            settings: Arc::new(SqliteSettingsRepo::new(pool)),
        }
    }
}
