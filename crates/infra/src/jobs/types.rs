//! Email job document and the retry policy that drives it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use courier_core::{Document, EventId, JobId, UserId};
use courier_events::{EmailTemplate, EventRecord};

use crate::dead_letter::FailureCode;

/// Claims stop after this many attempts; the next claim dead-letters the document.
pub const MAX_ATTEMPTS: u32 = 5;

/// An event claimed less than this long ago is considered in flight.
pub const LOCK_WINDOW: Duration = Duration::from_secs(2 * 60);

/// Minimum spacing between job attempts, indexed by attempts made so far.
pub const BACKOFF_TABLE: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(30),
    Duration::from_secs(2 * 60),
    Duration::from_secs(10 * 60),
    Duration::from_secs(30 * 60),
];

/// Job delivery status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a sweep (or the immediate dispatch shortcut) to claim it
    Queued,
    /// Claimed; a provider call is in flight
    Processing,
    /// Provider accepted the message
    Sent,
    /// Terminal; `failureCode` says why
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
        }
    }
}

/// Retry policy shared by the event processor and the job dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a document is dead-lettered
    pub max_attempts: u32,
    /// Soft lock held by an event claim
    pub lock_window: Duration,
    /// Delay table, clamped to its last entry
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            lock_window: LOCK_WINDOW,
            backoff: BACKOFF_TABLE.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Delay required after `attempts` attempts have been made.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(attempts).unwrap_or(usize::MAX).min(last);
        self.backoff[index]
    }

    /// Check if another attempt is allowed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// `true` while `last_attempt_at` is less than `window` before `now`.
    pub fn within(window: Duration, last_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_attempt_at {
            Some(last) => now.signed_duration_since(last) < to_chrono(window),
            None => false,
        }
    }

    pub fn next_delivery_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + to_chrono(self.delay_for_attempt(attempts))
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// One outbound email for one recipient of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub id: JobId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub template: EmailTemplate,
    pub template_payload: JsonValue,
    pub recipient_name: Option<String>,
    /// Stored as given by the directory; validated before every provider call.
    pub to_address: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub deliver_after_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Set when the job is `failed`
    #[serde(default)]
    pub failure_code: Option<FailureCode>,
    pub message_id: Option<String>,
    #[serde(with = "courier_core::timestamp")]
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Document for EmailJob {
    const COLLECTION: &'static str = "emailJobs";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

impl EmailJob {
    /// Queue an email for `user_id`. The id is derived from the event and the
    /// recipient, so re-processing an event addresses the same job.
    pub fn for_recipient(
        event: &EventRecord,
        user_id: UserId,
        to_address: impl Into<String>,
        recipient_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::for_recipient(event.id, &user_id),
            event_id: event.id,
            user_id,
            template: EmailTemplate::for_event(event.event_type),
            template_payload: event.payload.data(),
            recipient_name,
            to_address: to_address.into(),
            status: JobStatus::Queued,
            attempts: 0,
            last_attempt_at: None,
            deliver_after_at: None,
            error: None,
            failure_code: None,
            message_id: None,
            created_at: now,
            sent_at: None,
        }
    }

    /// Is a scheduled delivery still in the future?
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.deliver_after_at.is_some_and(|at| at > now)
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_sent(&mut self, message_id: String, now: DateTime<Utc>) {
        self.status = JobStatus::Sent;
        self.message_id = Some(message_id);
        self.error = None;
        self.deliver_after_at = None;
        self.sent_at = Some(now);
    }

    /// Back to the queue; the next claim waits until `deliver_after_at`.
    pub fn requeue(&mut self, error: String, deliver_after_at: Option<DateTime<Utc>>) {
        self.status = JobStatus::Queued;
        self.error = Some(error);
        self.deliver_after_at = deliver_after_at;
    }

    pub fn mark_failed(&mut self, code: FailureCode, error: String) {
        self.status = JobStatus::Failed;
        self.failure_code = Some(code);
        self.error = Some(error);
    }

    /// Operator replay: queued again with a fresh retry budget.
    pub fn reset_for_replay(&mut self) {
        self.status = JobStatus::Queued;
        self.attempts = 0;
        self.last_attempt_at = None;
        self.deliver_after_at = None;
        self.error = None;
        self.failure_code = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use courier_core::EntityId;
    use courier_events::{EventPayload, NewEvent, OrderDelivered};

    fn event() -> EventRecord {
        NewEvent::new(
            "order",
            EntityId::new("O1").unwrap(),
            EventPayload::OrderDelivered(OrderDelivered {
                order_id: "O1".into(),
                listing_title: "Lamp".into(),
            }),
        )
        .with_targets([UserId::new("buyer-1").unwrap()])
        .into_record(Utc::now())
    }

    #[test]
    fn backoff_table_is_clamped_to_last_entry() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1800));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(1800));
    }

    #[test]
    fn empty_backoff_table_means_no_delay() {
        let policy = RetryPolicy {
            backoff: Vec::new(),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(6));
    }

    #[test]
    fn lock_window_is_exclusive_at_its_end() {
        let now = Utc::now();
        let window = LOCK_WINDOW;

        assert!(!RetryPolicy::within(window, None, now));
        assert!(RetryPolicy::within(window, Some(now - ChronoDuration::seconds(119)), now));
        assert!(!RetryPolicy::within(window, Some(now - ChronoDuration::seconds(120)), now));
    }

    #[test]
    fn job_id_is_stable_per_recipient() {
        let event = event();
        let now = Utc::now();
        let a = EmailJob::for_recipient(&event, UserId::new("u1").unwrap(), "a@x.io", None, now);
        let b = EmailJob::for_recipient(&event, UserId::new("u1").unwrap(), "a@x.io", None, now);
        let c = EmailJob::for_recipient(&event, UserId::new("u2").unwrap(), "b@x.io", None, now);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.template, EmailTemplate::OrderDelivered);
        assert_eq!(a.status, JobStatus::Queued);
    }

    #[test]
    fn job_lifecycle() {
        let now = Utc::now();
        let mut job = EmailJob::for_recipient(&event(), UserId::new("u1").unwrap(), "a@x.io", None, now);

        job.mark_processing(now);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        job.requeue("rate_limited".into(), Some(now + ChronoDuration::seconds(30)));
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.is_deferred(now));
        assert!(!job.is_deferred(now + ChronoDuration::seconds(31)));

        job.mark_processing(now);
        job.mark_sent("msg-1".into(), now);
        assert_eq!(job.status, JobStatus::Sent);
        assert!(job.error.is_none());
        assert_eq!(job.sent_at, Some(now));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let job = EmailJob::for_recipient(&event(), UserId::new("u1").unwrap(), "a@x.io", None, Utc::now());
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["status"], "queued");
        assert_eq!(json["template"], "order_delivered");
        assert_eq!(json["templatePayload"]["orderId"], "O1");
        assert!(json["deliverAfterAt"].is_null());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn backoff_never_decreases(a in 0u32..50, b in 0u32..50) {
                let policy = RetryPolicy::default();
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                prop_assert!(policy.delay_for_attempt(lo) <= policy.delay_for_attempt(hi));
                prop_assert!(policy.delay_for_attempt(hi) <= Duration::from_secs(1800));
            }
        }
    }
}
