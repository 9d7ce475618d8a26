//! Layered configuration: built-in defaults, then `courier.toml`, then `COURIER_*`
//! environment variables.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `COURIER_STORE__BACKEND=postgres` or `COURIER_PIPELINE__BATCH_LIMIT=100`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::{
    BACKOFF_TABLE, HttpEmailProvider, HttpProviderConfig, ImmediateDispatch, LOCK_WINDOW,
    MAX_ATTEMPTS, Mailer, RecordingProvider, RetryPolicy,
};
use crate::pipeline::PipelineSettings;
use crate::runner::{DEFAULT_BATCH_LIMIT, DEFAULT_SCHEDULE_INTERVAL, DEFAULT_TIME_BUDGET, RunnerSettings};
use crate::store::{DocumentStore, InMemoryDocumentStore};

pub const CONFIG_FILE: &str = "courier.toml";
pub const ENV_PREFIX: &str = "COURIER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("store connection failed: {0}")]
    Store(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreSettings {
    Memory,
    Postgres { url: String, max_connections: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmailSettings {
    /// No provider; job sweeps refuse to run
    Unconfigured,
    /// Capture messages in memory (local runs)
    Recording,
    Http {
        endpoint: String,
        api_key: String,
        from: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_http_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub lock_window_secs: u64,
    pub backoff_secs: Vec<u64>,
    pub batch_limit: usize,
    pub time_budget_secs: u64,
    pub immediate_dispatch: ImmediateDispatch,
    pub immediate_timeout_ms: u64,
    pub scheduler_enabled: bool,
    pub schedule_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            lock_window_secs: LOCK_WINDOW.as_secs(),
            backoff_secs: BACKOFF_TABLE.iter().map(Duration::as_secs).collect(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            time_budget_secs: DEFAULT_TIME_BUDGET.as_secs(),
            immediate_dispatch: ImmediateDispatch::default(),
            immediate_timeout_ms: 5_000,
            scheduler_enabled: true,
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL.as_secs(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Operator API bind address
    pub listen_addr: String,
    /// JSON logs when `true`, human-readable otherwise
    pub log_json: bool,
    pub store: StoreSettings,
    pub email: EmailSettings,
    pub pipeline: PipelineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_json: true,
            store: StoreSettings::Memory,
            email: EmailSettings::Unconfigured,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Settings {
    /// Load from defaults, `courier.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("listen_addr '{}': {e}", self.listen_addr)))?;

        let p = &self.pipeline;
        if p.max_attempts == 0 {
            return Err(ConfigError::Invalid("pipeline.max_attempts must be at least 1".into()));
        }
        if p.backoff_secs.is_empty() {
            return Err(ConfigError::Invalid("pipeline.backoff_secs must not be empty".into()));
        }
        if p.batch_limit == 0 {
            return Err(ConfigError::Invalid("pipeline.batch_limit must be at least 1".into()));
        }
        if p.time_budget_secs == 0 || p.schedule_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.time_budget_secs and pipeline.schedule_interval_secs must be positive".into(),
            ));
        }

        if let EmailSettings::Http {
            endpoint, api_key, ..
        } = &self.email
        {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("email.endpoint '{endpoint}' is not an http(s) URL")));
            }
            if api_key.trim().is_empty() {
                return Err(ConfigError::Invalid("email.api_key must not be empty".into()));
            }
        }
        if let StoreSettings::Postgres { url, .. } = &self.store {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid("store.url must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("listen_addr '{}': {e}", self.listen_addr)))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let p = &self.pipeline;
        PipelineSettings {
            retry: RetryPolicy {
                max_attempts: p.max_attempts,
                lock_window: Duration::from_secs(p.lock_window_secs),
                backoff: p.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
            },
            runner: RunnerSettings {
                batch_limit: p.batch_limit,
                time_budget: Duration::from_secs(p.time_budget_secs),
            },
            immediate_dispatch: p.immediate_dispatch,
            immediate_timeout: Duration::from_millis(p.immediate_timeout_ms),
            schedule_interval: Duration::from_secs(p.schedule_interval_secs),
        }
    }

    pub fn mailer(&self) -> Result<Mailer, ConfigError> {
        match &self.email {
            EmailSettings::Unconfigured => Ok(Mailer::Unconfigured),
            EmailSettings::Recording => Ok(Mailer::configured(RecordingProvider::new())),
            EmailSettings::Http {
                endpoint,
                api_key,
                from,
                timeout_secs,
            } => {
                let provider = HttpEmailProvider::new(HttpProviderConfig {
                    endpoint: endpoint.clone(),
                    api_key: api_key.clone(),
                    from: from.clone(),
                    timeout: Duration::from_secs(*timeout_secs),
                })
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(Mailer::configured(provider))
            }
        }
    }

    /// Open the configured store, creating the schema where needed.
    pub async fn connect_store(&self) -> Result<Arc<dyn DocumentStore>, ConfigError> {
        match &self.store {
            StoreSettings::Memory => Ok(Arc::new(InMemoryDocumentStore::new())),
            #[cfg(feature = "postgres")]
            StoreSettings::Postgres {
                url,
                max_connections,
            } => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .connect(url)
                    .await
                    .map_err(|e| ConfigError::Store(e.to_string()))?;
                let store = crate::store::PostgresDocumentStore::new(pool);
                store
                    .migrate()
                    .await
                    .map_err(|e| ConfigError::Store(e.to_string()))?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            StoreSettings::Postgres { .. } => Err(ConfigError::Invalid(
                "store.backend = postgres requires the `postgres` feature".into(),
            )),
        }
    }
}
