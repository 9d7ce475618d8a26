//! Wiring of the pipeline components over one store.

use std::sync::Arc;
use std::time::Duration;

use courier_core::Clock;

use crate::dead_letter::DeadLetterRecorder;
use crate::directory::UserDirectory;
use crate::emitter::EventEmitter;
use crate::health::HealthRecorder;
use crate::jobs::{IMMEDIATE_DISPATCH_TIMEOUT, ImmediateDispatch, JobDispatcher, Mailer, RetryPolicy};
use crate::processor::EventProcessor;
use crate::runner::{DEFAULT_SCHEDULE_INTERVAL, PipelineRunner, RunnerSettings};
use crate::store::DocumentStore;

/// Typed pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub runner: RunnerSettings,
    pub immediate_dispatch: ImmediateDispatch,
    pub immediate_timeout: Duration,
    pub schedule_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            runner: RunnerSettings::default(),
            immediate_dispatch: ImmediateDispatch::default(),
            immediate_timeout: IMMEDIATE_DISPATCH_TIMEOUT,
            schedule_interval: DEFAULT_SCHEDULE_INTERVAL,
        }
    }
}

/// Every pipeline component, sharing one store and one clock.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub store: Arc<dyn DocumentStore>,
    pub emitter: EventEmitter,
    pub processor: EventProcessor,
    pub dispatcher: JobDispatcher,
    pub dead_letters: DeadLetterRecorder,
    pub health: HealthRecorder,
    pub runner: Arc<PipelineRunner>,
}

impl Pipeline {
    pub fn build(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn UserDirectory>,
        mailer: Mailer,
        settings: &PipelineSettings,
    ) -> Self {
        let dead_letters = DeadLetterRecorder::new(store.clone(), clock.clone());
        let dispatcher = JobDispatcher::new(
            store.clone(),
            clock.clone(),
            mailer,
            settings.retry.clone(),
            dead_letters.clone(),
        )
        .with_immediate_timeout(settings.immediate_timeout);

        // Without a provider the shortcut could only log failures.
        let immediate = if dispatcher.mailer().is_configured() {
            settings.immediate_dispatch
        } else {
            ImmediateDispatch::Off
        };
        let processor = EventProcessor::new(
            store.clone(),
            clock.clone(),
            directory,
            settings.retry.clone(),
            dead_letters.clone(),
        )
        .with_immediate_dispatch(dispatcher.clone(), immediate);

        let health = HealthRecorder::new(store.clone());
        let runner = Arc::new(PipelineRunner::new(
            processor.clone(),
            dispatcher.clone(),
            health.clone(),
            clock.clone(),
            settings.runner.clone(),
        ));

        Self {
            emitter: EventEmitter::new(store.clone(), clock),
            store,
            processor,
            dispatcher,
            dead_letters,
            health,
            runner,
        }
    }
}
