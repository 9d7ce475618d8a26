//! Event processor: claim pending events, run their handler, write jobs, finalize.
//!
//! ## Flow
//!
//! 1. **Claim** (one transaction): skip missing/non-pending/locked events, fail
//!    exhausted ones, otherwise bump `attempts` and stamp `lastAttemptAt`
//! 2. **Execute** (outside any transaction): the handler for the event type plans
//!    one job per reachable recipient; jobs are written with create-if-absent
//! 3. **Finalize** (one transaction): `processed` on success; on failure record the
//!    error and stay `pending` until the retry budget runs out. An exhausted event
//!    is dead-lettered first and marked `failed` second
//!
//! The claim's lock window is soft: a handler running past it may be executed twice.
//! Deterministic job ids make the second run write nothing new.

pub mod handlers;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use courier_core::{Clock, EventId, JobId};
use courier_events::{EventRecord, EventStatus};

use crate::dead_letter::{DeadLetter, DeadLetterRecorder, FailureCode, FailureInfo};
use crate::directory::UserDirectory;
use crate::error::PipelineError;
use crate::jobs::{EmailJob, ImmediateDispatch, JobDispatcher, RetryPolicy};
use crate::store::{Collection, DocumentQuery, DocumentStore, SortOrder, StoreError, Tx};

pub use handlers::{
    AdminAlertHandler, EventHandler, HandlerContext, HandlerError, UserEmailHandler, handler_for,
};

/// Result of a claim transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EventClaim {
    /// Claimed; carries the event as it was *before* the attempt was counted
    Claimed(EventRecord),
    Missing,
    NotPending(EventStatus),
    /// Claimed by someone else less than a lock window ago
    Locked,
    /// Retry budget exhausted; still `pending` until dead-lettered
    Exhausted(EventRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Processed { jobs_created: usize },
    /// Handler failed; the event stays `pending` for a later sweep
    Retrying { error: String },
    /// Handler failed for the last time, or the budget was already spent
    Failed { error: String },
    Skipped,
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatchReport {
    pub scanned: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct EventProcessor {
    events: Collection<EventRecord>,
    jobs: Collection<EmailJob>,
    directory: Arc<dyn UserDirectory>,
    dead_letters: DeadLetterRecorder,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    immediate: Option<(JobDispatcher, ImmediateDispatch)>,
}

impl EventProcessor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn UserDirectory>,
        policy: RetryPolicy,
        dead_letters: DeadLetterRecorder,
    ) -> Self {
        Self {
            events: Collection::new(store.clone()),
            jobs: Collection::new(store),
            directory,
            dead_letters,
            clock,
            policy,
            immediate: None,
        }
    }

    /// Hand newly created jobs to `dispatcher` right after they are written.
    pub fn with_immediate_dispatch(mut self, dispatcher: JobDispatcher, mode: ImmediateDispatch) -> Self {
        self.immediate = match mode {
            ImmediateDispatch::Off => None,
            mode => Some((dispatcher, mode)),
        };
        self
    }

    pub fn events(&self) -> &Collection<EventRecord> {
        &self.events
    }

    /// Claim transaction.
    ///
    /// An exhausted event is returned untouched; [`EventProcessor::process_event`]
    /// dead-letters it before marking it `failed`, so a crash in between leaves it
    /// claimable as exhausted again.
    pub async fn claim(&self, event_id: &str) -> Result<EventClaim, StoreError> {
        let now = self.clock.now();
        let policy = &self.policy;

        self.events
            .transact(event_id, |current| {
                let Some(mut event) = current else {
                    return Ok(Tx::Abort(EventClaim::Missing));
                };
                if event.status != EventStatus::Pending {
                    return Ok(Tx::Abort(EventClaim::NotPending(event.status)));
                }
                if !policy.should_retry(event.processing.attempts) {
                    return Ok(Tx::Abort(EventClaim::Exhausted(event)));
                }
                if RetryPolicy::within(policy.lock_window, event.processing.last_attempt_at, now) {
                    return Ok(Tx::Abort(EventClaim::Locked));
                }

                let snapshot = event.clone();
                event.processing.attempts += 1;
                event.processing.last_attempt_at = Some(now);
                Ok(Tx::Write(event, EventClaim::Claimed(snapshot)))
            })
            .await
    }

    /// Claim, execute and finalize one event.
    ///
    /// Handler failures are outcomes, not errors; only store failures are returned
    /// as `Err`.
    pub async fn process_event(&self, event_id: EventId) -> Result<EventOutcome, PipelineError> {
        let id = event_id.to_string();
        let snapshot = match self.claim(&id).await? {
            EventClaim::Claimed(snapshot) => snapshot,
            EventClaim::Exhausted(event) => {
                let error = event
                    .processing
                    .error
                    .clone()
                    .unwrap_or_else(|| "max attempts exceeded".into());
                return self.give_up(event, error).await;
            }
            other => {
                debug!(event_id = %event_id, claim = ?other, "event not claimed");
                return Ok(EventOutcome::Skipped);
            }
        };

        let attempt = snapshot.processing.attempts + 1;
        debug!(event_id = %event_id, event_type = %snapshot.event_type, attempt, "event claimed");

        match self.execute(&snapshot).await? {
            Ok(created) => {
                self.dispatch_created(&created).await;
                self.finalize(&id, Settle::Processed).await?;
                info!(
                    event_id = %event_id,
                    event_type = %snapshot.event_type,
                    jobs_created = created.len(),
                    "event processed"
                );
                Ok(EventOutcome::Processed {
                    jobs_created: created.len(),
                })
            }
            Err(handler_err) => {
                let error = handler_err.to_string();
                self.finalize(&id, Settle::Retry(error.clone())).await?;
                if self.policy.should_retry(attempt) {
                    warn!(event_id = %event_id, attempt, error = %error, "event handler failed; will retry");
                    return Ok(EventOutcome::Retrying { error });
                }
                let mut event = snapshot;
                event.processing.attempts = attempt;
                self.give_up(event, error).await
            }
        }
    }

    /// Dead-letter `event`, then mark it `failed`.
    async fn give_up(&self, mut event: EventRecord, error: String) -> Result<EventOutcome, PipelineError> {
        event.status = EventStatus::Failed;
        event.processing.error = Some(error.clone());
        self.dead_letters
            .record(DeadLetter::for_event(
                &event,
                FailureInfo::new(FailureCode::MaxAttempts, error.clone()),
            ))
            .await?;
        self.finalize(&event.id.to_string(), Settle::Failed(error.clone()))
            .await?;
        Ok(EventOutcome::Failed { error })
    }

    /// Run the handler and write its jobs. Returns the ids of jobs created now.
    async fn execute(
        &self,
        event: &EventRecord,
    ) -> Result<Result<Vec<JobId>, HandlerError>, StoreError> {
        let ctx = HandlerContext {
            directory: self.directory.as_ref(),
            now: self.clock.now(),
        };
        let jobs = match handler_for(event.event_type).plan_jobs(event, &ctx).await {
            Ok(jobs) => jobs,
            Err(err) => return Ok(Err(err)),
        };

        let mut created = Vec::with_capacity(jobs.len());
        for job in &jobs {
            if self.jobs.create_if_absent(job).await? {
                created.push(job.id);
            } else {
                debug!(event_id = %event.id, job_id = %job.id, "job already exists");
            }
        }
        Ok(Ok(created))
    }

    async fn dispatch_created(&self, created: &[JobId]) {
        let Some((dispatcher, mode)) = &self.immediate else {
            return;
        };
        for job_id in created {
            let _ = dispatcher
                .dispatch_now(*job_id, *mode == ImmediateDispatch::Wait)
                .await;
        }
    }

    /// Write the result of an attempt. A no-op once the event left `pending`.
    async fn finalize(&self, event_id: &str, settle: Settle) -> Result<(), StoreError> {
        let now = self.clock.now();

        self.events
            .transact(event_id, |current| {
                let Some(mut event) = current else {
                    return Ok(Tx::Abort(()));
                };
                if event.status != EventStatus::Pending {
                    return Ok(Tx::Abort(()));
                }
                match &settle {
                    Settle::Processed => {
                        event.status = EventStatus::Processed;
                        event.processed_at = Some(now);
                        event.processing.error = None;
                    }
                    Settle::Retry(error) => event.processing.error = Some(error.clone()),
                    Settle::Failed(error) => {
                        event.status = EventStatus::Failed;
                        event.processing.error = Some(error.clone());
                    }
                }
                Ok(Tx::Write(event, ()))
            })
            .await
    }

    /// Sweep pending events, oldest first.
    ///
    /// Returns the counters gathered so far together with the error that aborted
    /// the sweep, if any. Only a fatal error aborts; a document that cannot be read
    /// or written is counted as failed and the sweep moves on.
    pub async fn run_batch(
        &self,
        limit: usize,
        deadline: Instant,
    ) -> (EventBatchReport, Option<PipelineError>) {
        let mut report = EventBatchReport::default();
        let pending = match self
            .events
            .scan(
                &DocumentQuery::new()
                    .where_eq("status", EventStatus::Pending.as_str())
                    .order_by("createdAt", SortOrder::Asc)
                    .limit(limit),
            )
            .await
        {
            Ok(scan) => scan,
            Err(err) => return (report, Some(err.into())),
        };
        report.scanned += pending.undecodable.len();
        report.failed += pending.undecodable.len();

        for event in pending.documents {
            if Instant::now() >= deadline {
                report.timed_out = true;
                info!(scanned = report.scanned, "event sweep stopped at time budget");
                break;
            }
            report.scanned += 1;
            match self.process_event(event.id).await {
                Ok(EventOutcome::Processed { .. }) => report.processed += 1,
                Ok(EventOutcome::Retrying { .. } | EventOutcome::Failed { .. }) => report.failed += 1,
                Ok(EventOutcome::Skipped) => report.skipped += 1,
                Err(err) if !err.is_fatal() => {
                    warn!(event_id = %event.id, error = %err, "event could not be processed");
                    report.failed += 1;
                }
                Err(err) => return (report, Some(err)),
            }
        }

        debug!(?report, "event sweep finished");
        (report, None)
    }
}

/// Result of one attempt, as written by [`EventProcessor::finalize`].
#[derive(Debug)]
enum Settle {
    Processed,
    Retry(String),
    Failed(String),
}
