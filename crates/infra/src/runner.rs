//! Pipeline runner and the interval scheduler that drives it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use courier_core::Clock;

use crate::error::PipelineError;
use crate::health::{HealthRecorder, PipelineHealth, PipelineKind};
use crate::jobs::{JobBatchReport, JobDispatcher};
use crate::processor::{EventBatchReport, EventProcessor};

pub const DEFAULT_BATCH_LIMIT: usize = 50;
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(45);
pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Events,
    Jobs,
    #[default]
    All,
}

impl Phase {
    fn includes_events(&self) -> bool {
        matches!(self, Phase::Events | Phase::All)
    }

    fn includes_jobs(&self) -> bool {
        matches!(self, Phase::Jobs | Phase::All)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub phase: Phase,
    /// Per-phase cap; the runner's default when absent
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub events: Option<EventBatchReport>,
    pub jobs: Option<JobBatchReport>,
    pub timed_out: bool,
    pub fatal_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub batch_limit: usize,
    /// Wall-clock budget per phase
    pub time_budget: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            time_budget: DEFAULT_TIME_BUDGET,
        }
    }
}

/// Runs the event and job sweeps and records their health.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    processor: EventProcessor,
    dispatcher: JobDispatcher,
    health: HealthRecorder,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
}

impl PipelineRunner {
    pub fn new(
        processor: EventProcessor,
        dispatcher: JobDispatcher,
        health: HealthRecorder,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            processor,
            dispatcher,
            health,
            clock,
            settings,
        }
    }

    pub fn health(&self) -> &HealthRecorder {
        &self.health
    }

    /// Run the requested phases, events first.
    ///
    /// A fatal error in one phase is reported and recorded together with the work
    /// that phase finished before it; the other phase still runs. The first fatal
    /// error wins the report's `fatalError`.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let limit = request.limit.unwrap_or(self.settings.batch_limit);
        let mut report = RunReport::default();

        if request.phase.includes_events() {
            let started = Instant::now();
            let (batch, error) = self
                .processor
                .run_batch(limit, started + self.settings.time_budget)
                .await;
            let error = describe(error);
            self.record_health(
                PipelineKind::Events,
                started,
                batch.scanned,
                batch.processed,
                batch.failed,
                error.as_deref(),
            )
            .await;
            report.timed_out |= batch.timed_out;
            report.fatal_error = report.fatal_error.or(error);
            report.events = Some(batch);
        }

        if request.phase.includes_jobs() {
            let started = Instant::now();
            let (batch, error) = self
                .dispatcher
                .run_batch(limit, started + self.settings.time_budget)
                .await;
            let error = describe(error);
            self.record_health(
                PipelineKind::EmailJobs,
                started,
                batch.scanned,
                batch.sent,
                batch.failed + batch.requeued,
                error.as_deref(),
            )
            .await;
            report.timed_out |= batch.timed_out;
            report.fatal_error = report.fatal_error.or(error);
            report.jobs = Some(batch);
        }

        info!(
            phase = ?request.phase,
            limit,
            timed_out = report.timed_out,
            fatal = report.fatal_error.is_some(),
            "pipeline run finished"
        );
        report
    }

    async fn record_health(
        &self,
        pipeline: PipelineKind,
        started: Instant,
        scanned: usize,
        processed: usize,
        errors: usize,
        last_error: Option<&str>,
    ) {
        let health = PipelineHealth {
            id: pipeline,
            last_run_at: self.clock.now(),
            scanned_count: scanned,
            processed_count: processed,
            errors_count: errors,
            last_error: last_error.map(str::to_string),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        if let Err(err) = self.health.write(&health).await {
            error!(pipeline = pipeline.as_str(), error = %err, "failed to write health record");
        }
    }
}

fn describe(error: Option<PipelineError>) -> Option<String> {
    let err = error?;
    error!(error = %err, "pipeline phase aborted");
    Some(err.to_string())
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    runs: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Request graceful shutdown. A run in progress is allowed to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            warn!(error = %err, "scheduler task ended abnormally");
        }
    }

    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

/// Calls [`PipelineRunner::run`] on a fixed interval, the first time immediately.
#[derive(Debug)]
pub struct Scheduler;

impl Scheduler {
    pub fn spawn(runner: Arc<PipelineRunner>, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let runs = Arc::new(AtomicU64::new(0));
        let counter = runs.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "pipeline scheduler started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let report = runner.run(RunRequest::default()).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        if let Some(err) = &report.fatal_error {
                            warn!(error = %err, "scheduled run reported a fatal error");
                        }
                    }
                }
            }

            info!("pipeline scheduler stopped");
        });

        SchedulerHandle {
            shutdown: Some(shutdown_tx),
            join,
            runs,
        }
    }
}
