//! Process settings resolution and store access.

use anyhow::{Context as _, Result};
use jobq_config::{LogFormat, SystemConfig, load_system_config};
use jobq_db::Store;
use jobq_scheduler::{ControlPlane, JobQueue};
use std::path::Path;

/// Database used when neither the settings file nor the command line names one.
pub const DEFAULT_DATABASE: &str = "queue.db";

/// Settings file first, then command-line and environment overrides.
pub fn load_settings(
    config_path: Option<&Path>,
    database: Option<String>,
    log_format: Option<LogFormat>,
) -> Result<SystemConfig> {
    let mut settings = match config_path {
        Some(path) => load_system_config(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => SystemConfig::default(),
    };
    if let Some(database) = database {
        settings.database_url = Some(database);
    }
    if let Some(log_format) = log_format {
        settings.log_format = log_format;
    }
    Ok(settings)
}

pub struct Context {
    pub settings: SystemConfig,
    pub database_url: String,
    pub store: Store,
}

impl Context {
    pub async fn open(settings: SystemConfig) -> Result<Self> {
        let database_url = jobq_db::normalize_url(
            settings
                .database_url
                .as_deref()
                .unwrap_or(DEFAULT_DATABASE),
        );
        let pool = jobq_db::open_store(&database_url, settings.busy_timeout)
            .await
            .with_context(|| format!("failed to open queue at {}", database_url))?;

        Ok(Self {
            settings,
            database_url,
            store: Store::sqlite(pool),
        })
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.store.clone())
    }

    pub fn control(&self) -> ControlPlane {
        ControlPlane::new(self.store.clone())
    }
}
