//! Infrastructure layer: document store, pipeline components, config, providers.

pub mod config;
pub mod dead_letter;
pub mod directory;
pub mod emitter;
pub mod error;
pub mod health;
pub mod jobs;
pub mod pipeline;
pub mod processor;
pub mod runner;
pub mod store;


pub use config::{ConfigError, EmailSettings, Settings, StoreSettings};
pub use dead_letter::{DeadLetterKind, DeadLetterRecord, DeadLetterRecorder, FailureCode};
pub use directory::{
    DocumentUserDirectory, InMemoryUserDirectory, UserDirectory, UserProfile, UserRecord,
};
pub use emitter::{EmitResult, EventEmitter, RawEvent};
pub use error::PipelineError;
pub use health::{HealthRecorder, PipelineHealth, PipelineKind};
pub use pipeline::{Pipeline, PipelineSettings};
pub use runner::{Phase, PipelineRunner, RunReport, RunRequest, Scheduler, SchedulerHandle};
