use std::sync::Arc;

use courier_core::SystemClock;
use courier_infra::directory::{DocumentUserDirectory, UserDirectory};
use courier_infra::jobs::Mailer;
use courier_infra::store::DocumentStore;
use courier_infra::{ConfigError, Pipeline, PipelineSettings, Settings};

/// Everything the handlers need.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub pipeline: Pipeline,
}

impl AppServices {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Wire the pipeline over an already opened store.
    pub fn with_store(
        store: Arc<dyn DocumentStore>,
        directory: Arc<dyn UserDirectory>,
        mailer: Mailer,
        settings: &PipelineSettings,
    ) -> Self {
        Self::new(Pipeline::build(
            store,
            Arc::new(SystemClock),
            directory,
            mailer,
            settings,
        ))
    }

    /// Production wiring: configured store and provider, wall clock, and
    /// recipients read from the store's `users` collection.
    pub async fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let store = settings.connect_store().await?;
        let mailer = settings.mailer()?;
        if !mailer.is_configured() {
            tracing::warn!("no email provider configured; job sweeps will fail fast");
        }
        let directory = Arc::new(DocumentUserDirectory::new(store.clone()));
        Ok(Self::with_store(
            store,
            directory,
            mailer,
            &settings.pipeline_settings(),
        ))
    }
}
