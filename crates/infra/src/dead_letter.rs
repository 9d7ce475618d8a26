//! Dead-letter recording for events and jobs that exhausted their retry budget.
//!
//! One record per originating document, keyed by its id. Recording again merges the
//! latest failure into the existing record and never resets operator bookkeeping
//! (`manualRetryCount`, `lastManualRetryAt`, `createdAt`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use courier_core::address::mask_address;
use courier_core::{Clock, Document, EventId, UserId};
use courier_events::{EmailTemplate, EventRecord, EventStatus, EventType};

use crate::error::PipelineError;
use crate::jobs::EmailJob;
use crate::store::{Collection, DocumentQuery, DocumentStore, SortOrder, StoreError, Tx};

/// Recipient lists kept in a record or snapshot are cut to this length.
pub const MAX_RECORDED_RECIPIENTS: usize = 10;

const SECRET_MARKERS: [&str; 5] = ["token", "password", "secret", "apikey", "api_key"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    Event,
    Job,
}

/// Why the document gave up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Retry budget exhausted
    MaxAttempts,
    /// Recipient address is malformed
    InvalidAddress,
    /// Stored template payload no longer renders
    RenderFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub code: FailureCode,
    pub message: String,
}

impl FailureInfo {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub id: String,
    pub kind: DeadLetterKind,
    pub event_type: Option<EventType>,
    pub template: Option<EmailTemplate>,
    pub event_id: Option<EventId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub recipients: Vec<UserId>,
    pub recipient_count: usize,
    pub attempts: u32,
    pub error: FailureInfo,
    pub snapshot: JsonValue,
    pub manual_retry_count: u32,
    pub last_manual_retry_at: Option<DateTime<Utc>>,
    #[serde(with = "courier_core::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "courier_core::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Document for DeadLetterRecord {
    const COLLECTION: &'static str = "notificationDeadLetters";

    fn document_id(&self) -> String {
        self.id.clone()
    }
}

/// A failure about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub kind: DeadLetterKind,
    pub id: String,
    pub event_type: Option<EventType>,
    pub template: Option<EmailTemplate>,
    pub event_id: Option<EventId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub recipients: Vec<UserId>,
    pub attempts: u32,
    pub error: FailureInfo,
    pub snapshot: JsonValue,
}

impl DeadLetter {
    pub fn for_event(event: &EventRecord, error: FailureInfo) -> Self {
        Self {
            kind: DeadLetterKind::Event,
            id: event.id.to_string(),
            event_type: Some(event.event_type),
            template: None,
            event_id: Some(event.id),
            entity_type: Some(event.entity_type.clone()),
            entity_id: Some(event.entity_id.to_string()),
            recipients: event.target_user_ids.clone(),
            attempts: event.processing.attempts,
            error,
            snapshot: serde_json::to_value(event).unwrap_or(JsonValue::Null),
        }
    }

    pub fn for_job(job: &EmailJob, error: FailureInfo) -> Self {
        Self {
            kind: DeadLetterKind::Job,
            id: job.id.to_string(),
            event_type: Some(job.template.event_type()),
            template: Some(job.template),
            event_id: Some(job.event_id),
            entity_type: None,
            entity_id: None,
            recipients: vec![job.user_id.clone()],
            attempts: job.attempts,
            error,
            snapshot: serde_json::to_value(job).unwrap_or(JsonValue::Null),
        }
    }
}

/// Strip a snapshot down to what an operator needs.
///
/// Secret-like fields are dropped, email addresses masked and recipient lists
/// truncated to [`MAX_RECORDED_RECIPIENTS`].
pub fn redact(snapshot: &JsonValue) -> JsonValue {
    redact_value(None, snapshot)
}

fn redact_value(key: Option<&str>, value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if is_secret_key(k) {
                    continue;
                }
                out.insert(k.clone(), redact_value(Some(k), v));
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => {
            let keep = if key.is_some_and(is_recipient_key) {
                MAX_RECORDED_RECIPIENTS
            } else {
                items.len()
            };
            JsonValue::Array(items.iter().take(keep).map(|v| redact_value(None, v)).collect())
        }
        JsonValue::String(s) if looks_like_address(s) => JsonValue::String(mask_address(s)),
        other => other.clone(),
    }
}

fn looks_like_address(s: &str) -> bool {
    s.contains('@') && !s.chars().any(char::is_whitespace)
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_recipient_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.contains("recipient") || lower == "targetuserids"
}

/// Writes, lists and replays dead letters.
#[derive(Debug, Clone)]
pub struct DeadLetterRecorder {
    letters: Collection<DeadLetterRecord>,
    events: Collection<EventRecord>,
    jobs: Collection<EmailJob>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterRecorder {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            letters: Collection::new(store.clone()),
            events: Collection::new(store.clone()),
            jobs: Collection::new(store),
            clock,
        }
    }

    /// Record (or merge into) the dead letter for `letter.id`.
    pub async fn record(&self, letter: DeadLetter) -> Result<DeadLetterRecord, StoreError> {
        let now = self.clock.now();
        let recipient_count = letter.recipients.len();
        let mut recipients = letter.recipients;
        recipients.truncate(MAX_RECORDED_RECIPIENTS);
        let snapshot = redact(&letter.snapshot);
        let id = letter.id.clone();

        let record = self
            .letters
            .transact(&id, |existing| {
                let (manual_retry_count, last_manual_retry_at, created_at) = match existing {
                    Some(prev) => (prev.manual_retry_count, prev.last_manual_retry_at, prev.created_at),
                    None => (0, None, now),
                };
                let record = DeadLetterRecord {
                    id: letter.id.clone(),
                    kind: letter.kind,
                    event_type: letter.event_type,
                    template: letter.template,
                    event_id: letter.event_id,
                    entity_type: letter.entity_type.clone(),
                    entity_id: letter.entity_id.clone(),
                    recipients: recipients.clone(),
                    recipient_count,
                    attempts: letter.attempts,
                    error: letter.error.clone(),
                    snapshot: snapshot.clone(),
                    manual_retry_count,
                    last_manual_retry_at,
                    created_at,
                    updated_at: now,
                };
                Ok(Tx::Write(record.clone(), record))
            })
            .await?;

        warn!(
            kind = ?record.kind,
            id = %record.id,
            attempts = record.attempts,
            code = ?record.error.code,
            "dead-lettered"
        );
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeadLetterRecord>, StoreError> {
        self.letters.get(id).await
    }

    /// Most recently updated first.
    pub async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, StoreError> {
        self.letters
            .query(
                &DocumentQuery::new()
                    .order_by("updatedAt", SortOrder::Desc)
                    .limit(limit),
            )
            .await
    }

    /// Operator-triggered retry.
    ///
    /// The originating document gets a fresh retry budget (`pending` event or
    /// `queued` job, zero attempts); the record stays and counts the replay.
    pub async fn replay(&self, id: &str) -> Result<DeadLetterRecord, PipelineError> {
        let Some(record) = self.letters.get(id).await? else {
            return Err(PipelineError::not_found("dead letter", id));
        };

        let reset = match record.kind {
            DeadLetterKind::Event => {
                self.events
                    .transact(id, |current| match current {
                        Some(mut event) => {
                            event.status = EventStatus::Pending;
                            event.processing.attempts = 0;
                            event.processing.last_attempt_at = None;
                            event.processing.error = None;
                            event.processed_at = None;
                            Ok(Tx::Write(event, true))
                        }
                        None => Ok(Tx::Abort(false)),
                    })
                    .await?
            }
            DeadLetterKind::Job => {
                self.jobs
                    .transact(id, |current| match current {
                        Some(mut job) => {
                            job.reset_for_replay();
                            Ok(Tx::Write(job, true))
                        }
                        None => Ok(Tx::Abort(false)),
                    })
                    .await?
            }
        };
        if !reset {
            warn!(id, kind = ?record.kind, "replayed dead letter has no originating document");
        }

        let now = self.clock.now();
        let updated = self
            .letters
            .transact(id, |current| match current {
                Some(mut record) => {
                    record.manual_retry_count += 1;
                    record.last_manual_retry_at = Some(now);
                    record.updated_at = now;
                    Ok(Tx::Write(record.clone(), Some(record)))
                }
                None => Ok(Tx::Abort(None)),
            })
            .await?
            .ok_or_else(|| PipelineError::not_found("dead letter", id))?;

        info!(
            id,
            kind = ?updated.kind,
            manual_retry_count = updated.manual_retry_count,
            "dead letter replayed"
        );
        Ok(updated)
    }
}
