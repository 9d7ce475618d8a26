//! The persisted event record and its idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use courier_core::{Document, DomainError, EntityId, EventId, UserId};

use crate::kind::{Audience, EventType};
use crate::payload::{EventPayload, FieldError, PayloadError};

const DEFAULT_HASH: &str = "default";
const KEY_SEPARATOR: u8 = 0x1f;

/// Deterministic idempotency key of a logical occurrence.
///
/// `sha256(type ␟ entityId ␟ (optionalHash | "default"))`, hex encoded. Two emissions
/// with the same triple address the same event document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    pub fn derive(event_type: EventType, entity_id: &EntityId, optional_hash: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(event_type.as_str().as_bytes());
        hasher.update([KEY_SEPARATOR]);
        hasher.update(entity_id.as_str().as_bytes());
        hasher.update([KEY_SEPARATOR]);
        hasher.update(optional_hash.unwrap_or(DEFAULT_HASH).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn event_id(&self) -> EventId {
        EventId::from_event_key(&self.0)
    }
}

impl core::fmt::Display for EventKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
        }
    }
}

/// Claim bookkeeping, mutated only by the event processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingState {
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A durable record of a domain occurrence awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor_id: Option<UserId>,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub target_user_ids: Vec<UserId>,
    pub payload: EventPayload,
    pub event_key: EventKey,
    pub status: EventStatus,
    pub processing: ProcessingState,
    #[serde(with = "courier_core::timestamp")]
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document for EventRecord {
    const COLLECTION: &'static str = "events";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

/// Everything a caller supplies to emit an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub actor_id: Option<UserId>,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub target_user_ids: Vec<UserId>,
    pub payload: EventPayload,
    /// Distinguishes repeated occurrences on the same entity (e.g. a bid id).
    pub optional_hash: Option<String>,
}

impl NewEvent {
    pub fn new(entity_type: impl Into<String>, entity_id: EntityId, payload: EventPayload) -> Self {
        Self {
            event_type: payload.event_type(),
            actor_id: None,
            entity_type: entity_type.into(),
            entity_id,
            target_user_ids: Vec::new(),
            payload,
            optional_hash: None,
        }
    }

    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = UserId>) -> Self {
        self.target_user_ids = targets.into_iter().collect();
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.optional_hash = Some(hash.into());
        self
    }

    pub fn event_key(&self) -> EventKey {
        EventKey::derive(self.event_type, &self.entity_id, self.optional_hash.as_deref())
    }

    /// Check the draft against the schema registered for its type.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.payload.event_type() != self.event_type {
            return Err(DomainError::from(PayloadError {
                event_type: self.event_type,
                errors: vec![FieldError::new(
                    "type",
                    format!("payload is a {} payload", self.payload.event_type()),
                )],
            }));
        }
        self.payload.validate()?;

        if self.entity_type.trim().is_empty() {
            return Err(DomainError::validation("entityType must not be empty"));
        }
        if self.target_user_ids.is_empty() && self.event_type.audience() == Audience::Recipients {
            return Err(DomainError::validation(format!(
                "{} requires at least one target user",
                self.event_type
            )));
        }
        Ok(())
    }

    /// Build the pending record. Recipients are de-duplicated, first occurrence wins.
    pub fn into_record(self, now: DateTime<Utc>) -> EventRecord {
        let event_key = self.event_key();
        let mut targets: Vec<UserId> = Vec::with_capacity(self.target_user_ids.len());
        for user in self.target_user_ids {
            if !targets.contains(&user) {
                targets.push(user);
            }
        }

        EventRecord {
            id: event_key.event_id(),
            event_type: self.event_type,
            actor_id: self.actor_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            target_user_ids: targets,
            payload: self.payload,
            event_key,
            status: EventStatus::Pending,
            processing: ProcessingState::default(),
            created_at: now,
            processed_at: None,
        }
    }
}

impl From<PayloadError> for DomainError {
    fn from(value: PayloadError) -> Self {
        DomainError::validation(value.to_string())
    }
}
