//! Job dispatcher: claim, deliver, record the outcome.
//!
//! Only exhausted jobs are dead-lettered. Invalid addresses and unrenderable
//! payloads fail the job with a `failureCode` and no dead letter.
//!
//! The batch sweep and the immediate dispatch shortcut share one code path
//! ([`JobDispatcher::dispatch`]), so a job racing between the two is claimed by at
//! most one of them; the loser sees a no-op.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use courier_core::{Clock, EmailAddress, JobId};

use crate::dead_letter::{DeadLetter, DeadLetterRecorder, FailureCode, FailureInfo};
use crate::error::PipelineError;
use crate::store::{Collection, DocumentQuery, DocumentStore, Scan, SortOrder, StoreError, Tx};

use super::provider::{EmailProvider, Mailer, SendOutcome};
use super::types::{EmailJob, JobStatus, RetryPolicy};

/// Default bound on an awaited immediate dispatch.
pub const IMMEDIATE_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the event processor hands freshly created jobs straight to the dispatcher.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmediateDispatch {
    /// Leave every job to the sweep
    Off,
    /// Spawn the dispatch and move on
    #[default]
    FireAndForget,
    /// Await the dispatch, bounded by the immediate dispatch timeout
    Wait,
}

/// Result of a claim transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum JobClaim {
    /// Claimed; the job as written (status `processing`, attempts incremented)
    Claimed(EmailJob),
    Missing,
    NotQueued(JobStatus),
    /// `deliverAfterAt` is still in the future
    Deferred,
    /// Last attempt is more recent than the backoff for its attempt count
    BackingOff,
    /// Retry budget exhausted; unchanged until dead-lettered
    Exhausted(EmailJob),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    NotQueued,
    Deferred,
    BackingOff,
    /// The job changed hands between claim and outcome
    Superseded,
}

/// What one dispatch did to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Sent { message_id: String },
    Requeued { error: String },
    Failed { code: FailureCode, error: String },
    Skipped(SkipReason),
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBatchReport {
    pub scanned: usize,
    pub sent: usize,
    pub failed: usize,
    pub requeued: usize,
    pub skipped: usize,
    pub timed_out: bool,
}

impl JobBatchReport {
    fn count(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Sent { .. } => self.sent += 1,
            JobOutcome::Requeued { .. } => self.requeued += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

enum Delivery {
    Sent(String),
    Rejected(String),
    Transport(String),
    Permanent(FailureInfo),
}

#[derive(Debug)]
struct Inner {
    jobs: Collection<EmailJob>,
    dead_letters: DeadLetterRecorder,
    mailer: Mailer,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    immediate_timeout: Duration,
}

/// Drives email jobs from `queued` to `sent` or `failed`.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    inner: Arc<Inner>,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        mailer: Mailer,
        policy: RetryPolicy,
        dead_letters: DeadLetterRecorder,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Collection::new(store),
                dead_letters,
                mailer,
                clock,
                policy,
                immediate_timeout: IMMEDIATE_DISPATCH_TIMEOUT,
            }),
        }
    }

    /// Override the bound on awaited immediate dispatches. Call before cloning.
    pub fn with_immediate_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.immediate_timeout = timeout;
        }
        self
    }

    pub fn jobs(&self) -> &Collection<EmailJob> {
        &self.inner.jobs
    }

    pub fn mailer(&self) -> &Mailer {
        &self.inner.mailer
    }

    /// Claim transaction.
    ///
    /// Exhausted jobs are returned untouched. [`JobDispatcher::dispatch`] writes
    /// their dead letter before marking them `failed`, so an interrupted hand-off
    /// is repeated by the next claim.
    pub async fn claim(&self, job_id: &str) -> Result<JobClaim, StoreError> {
        let now = self.inner.clock.now();
        let policy = &self.inner.policy;

        self.inner
            .jobs
            .transact(job_id, |current| {
                let Some(mut job) = current else {
                    return Ok(Tx::Abort(JobClaim::Missing));
                };

                match job.status {
                    JobStatus::Queued => {}
                    // A claim that outlived the lock window without an outcome is
                    // treated as abandoned.
                    JobStatus::Processing
                        if !RetryPolicy::within(policy.lock_window, job.last_attempt_at, now) => {}
                    other => return Ok(Tx::Abort(JobClaim::NotQueued(other))),
                }

                if !policy.should_retry(job.attempts) {
                    return Ok(Tx::Abort(JobClaim::Exhausted(job)));
                }
                if job.is_deferred(now) {
                    return Ok(Tx::Abort(JobClaim::Deferred));
                }
                let backoff = policy.delay_for_attempt(job.attempts);
                if RetryPolicy::within(backoff, job.last_attempt_at, now) {
                    return Ok(Tx::Abort(JobClaim::BackingOff));
                }

                job.mark_processing(now);
                Ok(Tx::Write(job.clone(), JobClaim::Claimed(job)))
            })
            .await
    }

    /// Claim, deliver and record the outcome of one job.
    pub async fn dispatch(&self, job_id: JobId) -> Result<JobOutcome, PipelineError> {
        let provider = self
            .inner
            .mailer
            .provider()
            .ok_or(PipelineError::MailerUnconfigured)?
            .clone();

        let job = match self.claim(&job_id.to_string()).await? {
            JobClaim::Claimed(job) => job,
            JobClaim::Exhausted(job) => return self.give_up(job).await,
            other => {
                debug!(job_id = %job_id, claim = ?other, "job not claimed");
                return Ok(JobOutcome::Skipped(match other {
                    JobClaim::Missing => SkipReason::Missing,
                    JobClaim::Deferred => SkipReason::Deferred,
                    JobClaim::BackingOff => SkipReason::BackingOff,
                    _ => SkipReason::NotQueued,
                }));
            }
        };

        debug!(job_id = %job_id, attempts = job.attempts, template = ?job.template, "job claimed");
        let delivery = deliver(provider.as_ref(), &job).await;
        self.record_outcome(job, delivery).await
    }

    async fn record_outcome(
        &self,
        claimed: EmailJob,
        delivery: Delivery,
    ) -> Result<JobOutcome, PipelineError> {
        let now = self.inner.clock.now();
        let job_id = claimed.id.to_string();
        let attempts = claimed.attempts;

        match delivery {
            Delivery::Sent(message_id) => {
                let written = self
                    .update_claimed(&job_id, attempts, |job| job.mark_sent(message_id.clone(), now))
                    .await?;
                if written.is_none() {
                    warn!(job_id = %job_id, "job changed while sending; outcome dropped");
                    return Ok(JobOutcome::Skipped(SkipReason::Superseded));
                }
                info!(job_id = %job_id, attempts, message_id = %message_id, "email sent");
                Ok(JobOutcome::Sent { message_id })
            }
            Delivery::Rejected(error) => {
                let deliver_after = self.inner.policy.next_delivery_at(attempts, now);
                let written = self
                    .update_claimed(&job_id, attempts, |job| {
                        job.requeue(error.clone(), Some(deliver_after))
                    })
                    .await?;
                if written.is_none() {
                    return Ok(JobOutcome::Skipped(SkipReason::Superseded));
                }
                warn!(job_id = %job_id, attempts, error = %error, "provider rejected email; requeued");
                Ok(JobOutcome::Requeued { error })
            }
            Delivery::Transport(error) => {
                match self
                    .update_claimed(&job_id, attempts, |job| job.requeue(error.clone(), None))
                    .await
                {
                    Ok(_) => warn!(job_id = %job_id, attempts, error = %error, "transport error; requeued"),
                    Err(store_err) => error!(
                        job_id = %job_id,
                        attempts,
                        error = %error,
                        store_error = %store_err,
                        "failed to requeue job after transport error"
                    ),
                }
                Ok(JobOutcome::Requeued { error })
            }
            Delivery::Permanent(failure) => {
                let written = self
                    .update_claimed(&job_id, attempts, |job| {
                        job.mark_failed(failure.code, failure.message.clone())
                    })
                    .await?;
                if written.is_none() {
                    return Ok(JobOutcome::Skipped(SkipReason::Superseded));
                }
                error!(job_id = %job_id, code = ?failure.code, error = %failure.message, "email permanently failed");
                Ok(JobOutcome::Failed {
                    code: failure.code,
                    error: failure.message,
                })
            }
        }
    }

    /// Dead-letter an exhausted job, then mark it `failed`.
    async fn give_up(&self, mut job: EmailJob) -> Result<JobOutcome, PipelineError> {
        let (status, attempts) = (job.status, job.attempts);
        let last = job.error.clone().unwrap_or_else(|| "no error recorded".into());
        let message = format!("max attempts exceeded: {last}");
        job.mark_failed(FailureCode::MaxAttempts, message.clone());

        self.inner
            .dead_letters
            .record(DeadLetter::for_job(
                &job,
                FailureInfo::new(FailureCode::MaxAttempts, message.clone()),
            ))
            .await?;

        self.inner
            .jobs
            .transact(&job.id.to_string(), |current| match current {
                Some(mut current) if current.status == status && current.attempts == attempts => {
                    current.mark_failed(FailureCode::MaxAttempts, message.clone());
                    Ok(Tx::Write(current, ()))
                }
                _ => Ok(Tx::Abort(())),
            })
            .await?;

        Ok(JobOutcome::Failed {
            code: FailureCode::MaxAttempts,
            error: message,
        })
    }

    /// Apply `apply` only if the job is still the claim we made.
    async fn update_claimed<F>(
        &self,
        job_id: &str,
        attempts: u32,
        mut apply: F,
    ) -> Result<Option<EmailJob>, StoreError>
    where
        F: FnMut(&mut EmailJob) + Send,
    {
        self.inner
            .jobs
            .transact(job_id, |current| match current {
                Some(mut job) if job.status == JobStatus::Processing && job.attempts == attempts => {
                    apply(&mut job);
                    Ok(Tx::Write(job.clone(), Some(job)))
                }
                _ => Ok(Tx::Abort(None)),
            })
            .await
    }

    /// Sweep queued jobs, oldest first, then processing jobs whose claim expired.
    ///
    /// Fails fast when no provider is configured. Returns the counters gathered so
    /// far together with the error that aborted the sweep, if any. Per-job delivery
    /// failures never abort, and neither does a job that cannot be read or written.
    pub async fn run_batch(
        &self,
        limit: usize,
        deadline: Instant,
    ) -> (JobBatchReport, Option<PipelineError>) {
        let mut report = JobBatchReport::default();
        if !self.inner.mailer.is_configured() {
            return (report, Some(PipelineError::MailerUnconfigured));
        }

        let queued = match self.candidates(JobStatus::Queued, limit).await {
            Ok(scan) => scan,
            Err(err) => return (report, Some(err.into())),
        };
        let mut undecodable = queued.undecodable.len();
        let mut candidates = queued.documents;

        let remaining = limit.saturating_sub(candidates.len() + undecodable);
        if remaining > 0 {
            let stale = match self.candidates(JobStatus::Processing, remaining).await {
                Ok(scan) => scan,
                Err(err) => return (report, Some(err.into())),
            };
            let now = self.inner.clock.now();
            undecodable += stale.undecodable.len();
            candidates.extend(stale.documents.into_iter().filter(|job| {
                !RetryPolicy::within(self.inner.policy.lock_window, job.last_attempt_at, now)
            }));
        }
        report.scanned += undecodable;
        report.failed += undecodable;

        for job in candidates {
            if Instant::now() >= deadline {
                report.timed_out = true;
                info!(scanned = report.scanned, "job sweep stopped at time budget");
                break;
            }
            report.scanned += 1;
            match self.dispatch(job.id).await {
                Ok(outcome) => report.count(&outcome),
                Err(err) if !err.is_fatal() => {
                    warn!(job_id = %job.id, error = %err, "job could not be dispatched");
                    report.failed += 1;
                }
                Err(err) => return (report, Some(err)),
            }
        }

        debug!(?report, "job sweep finished");
        (report, None)
    }

    async fn candidates(&self, status: JobStatus, limit: usize) -> Result<Scan<EmailJob>, StoreError> {
        self.inner
            .jobs
            .scan(
                &DocumentQuery::new()
                    .where_eq("status", status.as_str())
                    .order_by("createdAt", SortOrder::Asc)
                    .limit(limit),
            )
            .await
    }

    /// Best-effort inline dispatch of a just-created job.
    ///
    /// Never propagates failures. With `wait`, returns the outcome if the dispatch
    /// finished within the immediate dispatch timeout; otherwise the job is left to
    /// the sweep.
    pub async fn dispatch_now(&self, job_id: JobId, wait: bool) -> Option<JobOutcome> {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let result = this.dispatch(job_id).await;
            if let Err(err) = &result {
                warn!(job_id = %job_id, error = %err, "immediate dispatch failed");
            }
            result
        });

        if !wait {
            return None;
        }

        match tokio::time::timeout(self.inner.immediate_timeout, task).await {
            Ok(Ok(Ok(outcome))) => Some(outcome),
            Ok(Ok(Err(_))) => None,
            Ok(Err(join_err)) => {
                warn!(job_id = %job_id, error = %join_err, "immediate dispatch task aborted");
                None
            }
            Err(_) => {
                warn!(job_id = %job_id, "immediate dispatch timed out; left to the sweep");
                None
            }
        }
    }
}

async fn deliver(provider: &dyn EmailProvider, job: &EmailJob) -> Delivery {
    let to = match EmailAddress::parse(&job.to_address) {
        Ok(to) => to,
        Err(err) => {
            return Delivery::Permanent(FailureInfo::new(FailureCode::InvalidAddress, err.to_string()));
        }
    };
    let email = match job.template.render(&job.template_payload, job.recipient_name.as_deref()) {
        Ok(email) => email,
        Err(err) => {
            return Delivery::Permanent(FailureInfo::new(FailureCode::RenderFailed, err.to_string()));
        }
    };

    match provider.send(&to, &email.subject, &email.body).await {
        Ok(SendOutcome::Delivered { message_id }) => Delivery::Sent(message_id),
        Ok(SendOutcome::Rejected { error }) => Delivery::Rejected(error),
        Err(err) => Delivery::Transport(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use courier_core::{EntityId, ManualClock, UserId};
    use courier_events::{EventPayload, NewEvent, OrderShipped};

    use crate::jobs::provider::{RecordingProvider, TransportError};
    use crate::store::InMemoryDocumentStore;

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        clock: ManualClock,
        provider: RecordingProvider,
        dispatcher: JobDispatcher,
        dead_letters: DeadLetterRecorder,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let clock = ManualClock::new(Utc::now());
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let provider = RecordingProvider::new();
        let dead_letters = DeadLetterRecorder::new(store.clone(), clock_arc.clone());
        let dispatcher = JobDispatcher::new(
            store.clone(),
            clock_arc,
            Mailer::configured(provider.clone()),
            RetryPolicy::default(),
            dead_letters.clone(),
        );
        Fixture {
            store,
            clock,
            provider,
            dispatcher,
            dead_letters,
        }
    }

    fn job(f: &Fixture, to: &str) -> EmailJob {
        let event = NewEvent::new(
            "order",
            EntityId::new("O1").unwrap(),
            EventPayload::OrderShipped(OrderShipped {
                order_id: "O1".into(),
                carrier: "UPS".into(),
                tracking_number: "1Z".into(),
            }),
        )
        .with_targets([UserId::new("buyer-1").unwrap()])
        .into_record(f.clock.now());
        EmailJob::for_recipient(&event, UserId::new("buyer-1").unwrap(), to, Some("Sam".into()), f.clock.now())
    }

    async fn stored(f: &Fixture, id: JobId) -> EmailJob {
        f.dispatcher.jobs().get(&id.to_string()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn queued_job_is_sent() {
        let f = fixture();
        let j = job(&f, "buyer@example.com");
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert_eq!(outcome, JobOutcome::Sent { message_id: "msg-1".into() });
        let saved = stored(&f, j.id).await;
        assert_eq!(saved.status, JobStatus::Sent);
        assert_eq!(saved.attempts, 1);
        assert_eq!(saved.message_id.as_deref(), Some("msg-1"));
        assert!(saved.sent_at.is_some());
        assert_eq!(f.provider.sent()[0].subject, "Order O1 has shipped");
    }

    #[tokio::test]
    async fn soft_failure_requeues_with_backoff() {
        let f = fixture();
        let j = job(&f, "buyer@example.com");
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();
        f.provider.reject_next("rate_limited");

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert_eq!(outcome, JobOutcome::Requeued { error: "rate_limited".into() });
        let saved = stored(&f, j.id).await;
        assert_eq!(saved.status, JobStatus::Queued);
        assert_eq!(saved.attempts, 1);
        assert_eq!(saved.error.as_deref(), Some("rate_limited"));
        assert_eq!(saved.deliver_after_at, Some(f.clock.now() + ChronoDuration::seconds(30)));

        // Backoff gate holds until the delay has passed.
        let again = f.dispatcher.dispatch(j.id).await.unwrap();
        assert_eq!(again, JobOutcome::Skipped(SkipReason::Deferred));

        f.clock.advance(ChronoDuration::seconds(30));
        let third = f.dispatcher.dispatch(j.id).await.unwrap();
        assert!(matches!(third, JobOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn transport_error_requeues_without_schedule() {
        let f = fixture();
        let j = job(&f, "buyer@example.com");
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();
        f.provider.fail_next(TransportError::Timeout);

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Requeued { .. }));
        let saved = stored(&f, j.id).await;
        assert_eq!(saved.status, JobStatus::Queued);
        assert!(saved.deliver_after_at.is_none());

        // Still gated by the backoff for one attempt.
        assert_eq!(
            f.dispatcher.dispatch(j.id).await.unwrap(),
            JobOutcome::Skipped(SkipReason::BackingOff)
        );
    }

    #[tokio::test]
    async fn invalid_address_is_terminal_and_never_sent() {
        let f = fixture();
        let j = job(&f, "not-an-address");
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Failed { code: FailureCode::InvalidAddress, .. }
        ));
        assert_eq!(f.provider.calls(), 0);
        let saved = stored(&f, j.id).await;
        assert_eq!(saved.status, JobStatus::Failed);
        assert_eq!(saved.attempts, 1);
        assert_eq!(saved.failure_code, Some(FailureCode::InvalidAddress));
        // Only exhaustion is dead-lettered.
        assert!(f.dead_letters.get(&j.id.to_string()).await.unwrap().is_none());

        // Terminal: never claimed again.
        f.clock.advance(ChronoDuration::hours(1));
        assert_eq!(
            f.dispatcher.dispatch(j.id).await.unwrap(),
            JobOutcome::Skipped(SkipReason::NotQueued)
        );
    }

    #[tokio::test]
    async fn unrenderable_payload_is_terminal() {
        let f = fixture();
        let mut j = job(&f, "buyer@example.com");
        j.template_payload = serde_json::json!({"orderId": "O1"});
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { code: FailureCode::RenderFailed, .. }));
        assert_eq!(f.provider.calls(), 0);
        assert_eq!(stored(&f, j.id).await.failure_code, Some(FailureCode::RenderFailed));
    }

    #[tokio::test]
    async fn exhausted_job_fails_on_next_claim() {
        let f = fixture();
        let mut j = job(&f, "buyer@example.com");
        j.attempts = 5;
        j.error = Some("rate_limited".into());
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { code: FailureCode::MaxAttempts, .. }));
        let saved = stored(&f, j.id).await;
        assert_eq!(saved.status, JobStatus::Failed);
        assert_eq!(saved.attempts, 5);
        assert_eq!(saved.failure_code, Some(FailureCode::MaxAttempts));
        let letter = f.dead_letters.get(&j.id.to_string()).await.unwrap().unwrap();
        assert_eq!(letter.attempts, 5);
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn lost_dead_letter_write_is_repeated_by_next_claim() {
        let f = fixture();
        let mut j = job(&f, "buyer@example.com");
        j.attempts = 5;
        j.error = Some("rate_limited".into());
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();
        f.store.fail_writes_to("notificationDeadLetters", 1);

        let err = f.dispatcher.dispatch(j.id).await.unwrap_err();

        assert!(matches!(err, PipelineError::Store(StoreError::Unavailable(_))));
        assert!(err.is_fatal());
        assert_eq!(stored(&f, j.id).await.status, JobStatus::Queued);
        assert!(f.dead_letters.get(&j.id.to_string()).await.unwrap().is_none());

        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { code: FailureCode::MaxAttempts, .. }));
        assert_eq!(stored(&f, j.id).await.status, JobStatus::Failed);
        assert!(f.dead_letters.get(&j.id.to_string()).await.unwrap().is_some());
        assert_eq!(f.store.count("notificationDeadLetters"), 1);
    }

    #[tokio::test]
    async fn undecodable_job_does_not_stop_the_sweep() {
        let f = fixture();
        let j = job(&f, "buyer@example.com");
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();
        f.store
            .create_if_absent(
                "emailJobs",
                "broken",
                serde_json::json!({"status": "queued", "createdAt": "0000-01-01T00:00:00.000000Z"}),
            )
            .await
            .unwrap();

        let (report, err) = f
            .dispatcher
            .run_batch(50, Instant::now() + Duration::from_secs(45))
            .await;

        assert!(err.is_none());
        assert_eq!(report.scanned, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(stored(&f, j.id).await.status, JobStatus::Sent);
    }

    #[tokio::test]
    async fn abandoned_processing_job_is_reclaimed_after_lock_window() {
        let f = fixture();
        let mut j = job(&f, "buyer@example.com");
        j.mark_processing(f.clock.now());
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();

        assert_eq!(
            f.dispatcher.dispatch(j.id).await.unwrap(),
            JobOutcome::Skipped(SkipReason::NotQueued)
        );

        f.clock.advance(ChronoDuration::minutes(3));
        let outcome = f.dispatcher.dispatch(j.id).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Sent { .. }));
        assert_eq!(stored(&f, j.id).await.attempts, 2);
    }

    #[tokio::test]
    async fn unconfigured_mailer_fails_before_claiming() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let dead_letters = DeadLetterRecorder::new(store.clone(), clock.clone());
        let dispatcher = JobDispatcher::new(
            store,
            clock,
            Mailer::Unconfigured,
            RetryPolicy::default(),
            dead_letters,
        );

        let (report, err) = dispatcher
            .run_batch(50, Instant::now() + Duration::from_secs(45))
            .await;
        assert!(matches!(err, Some(PipelineError::MailerUnconfigured)));
        assert_eq!(report, JobBatchReport::default());
    }

    #[tokio::test]
    async fn awaited_immediate_dispatch_returns_outcome() {
        let f = fixture();
        let j = job(&f, "buyer@example.com");
        f.dispatcher.jobs().create_if_absent(&j).await.unwrap();

        let outcome = f.dispatcher.dispatch_now(j.id, true).await;

        assert!(matches!(outcome, Some(JobOutcome::Sent { .. })));
    }

    #[tokio::test]
    async fn slow_immediate_dispatch_is_abandoned_at_timeout() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let dead_letters = DeadLetterRecorder::new(store.clone(), clock.clone());
        let dispatcher = JobDispatcher::new(
            store,
            clock,
            Mailer::configured(RecordingProvider::new().with_delay(Duration::from_millis(500))),
            RetryPolicy::default(),
            dead_letters,
        )
        .with_immediate_timeout(Duration::from_millis(20));

        let f = fixture();
        let j = job(&f, "buyer@example.com");
        dispatcher.jobs().create_if_absent(&j).await.unwrap();

        assert!(dispatcher.dispatch_now(j.id, true).await.is_none());
    }
}
