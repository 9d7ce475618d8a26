//! Event emission.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use courier_core::{Clock, DomainError, EntityId, EventId, UserId};
use courier_events::{EventKey, EventPayload, EventRecord, EventType, NewEvent};

use crate::error::PipelineError;
use crate::store::{Collection, DocumentStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitResult {
    /// `false` when an event with the same key already existed
    pub created: bool,
    pub event_id: EventId,
    pub event_key: EventKey,
}

/// An emission request whose payload has not been validated yet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub actor_id: Option<UserId>,
    pub entity_type: String,
    pub entity_id: EntityId,
    #[serde(default)]
    pub target_user_ids: Vec<UserId>,
    pub payload: JsonValue,
    #[serde(default)]
    pub optional_hash: Option<String>,
}

/// Turns domain occurrences into idempotent event records.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    events: Collection<EventRecord>,
    clock: Arc<dyn Clock>,
}

impl EventEmitter {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Collection::new(store),
            clock,
        }
    }

    /// Validate and persist an event unless one with the same key exists.
    ///
    /// Re-emitting the same (type, entity, hash) is not an error: the existing event
    /// is left untouched and `created` is `false`.
    pub async fn emit(&self, draft: NewEvent) -> Result<EmitResult, PipelineError> {
        draft.validate()?;

        let record = draft.into_record(self.clock.now());
        let event_id = record.id;
        let event_key = record.event_key.clone();
        let created = self.events.create_if_absent(&record).await?;

        if created {
            info!(
                event_id = %event_id,
                event_type = %record.event_type,
                entity_id = %record.entity_id,
                recipients = record.target_user_ids.len(),
                "event emitted"
            );
        } else {
            debug!(event_id = %event_id, event_type = %record.event_type, "duplicate emission ignored");
        }

        Ok(EmitResult {
            created,
            event_id,
            event_key,
        })
    }

    /// Validate an untyped payload against the schema for `raw.event_type`, then emit.
    pub async fn emit_raw(&self, raw: RawEvent) -> Result<EmitResult, PipelineError> {
        let payload =
            EventPayload::from_raw(raw.event_type, raw.payload).map_err(DomainError::from)?;

        let mut draft = NewEvent::new(raw.entity_type, raw.entity_id, payload)
            .with_targets(raw.target_user_ids);
        if let Some(actor) = raw.actor_id {
            draft = draft.with_actor(actor);
        }
        if let Some(hash) = raw.optional_hash {
            draft = draft.with_hash(hash);
        }
        self.emit(draft).await
    }

    pub async fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, PipelineError> {
        Ok(self.events.get(&event_id.to_string()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ManualClock;
    use courier_events::{EventStatus, OrderDelivered};
    use serde_json::json;

    use crate::store::InMemoryDocumentStore;

    fn emitter() -> (EventEmitter, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let emitter = EventEmitter::new(store.clone(), Arc::new(ManualClock::default()));
        (emitter, store)
    }

    fn delivered(hash: &str) -> NewEvent {
        NewEvent::new(
            "order",
            EntityId::new("O1").unwrap(),
            EventPayload::OrderDelivered(OrderDelivered {
                order_id: "O1".into(),
                listing_title: "Lamp".into(),
            }),
        )
        .with_targets([UserId::new("buyer-1").unwrap()])
        .with_hash(hash)
    }

    #[tokio::test]
    async fn emission_is_idempotent_per_key() {
        let (emitter, store) = emitter();

        let first = emitter.emit(delivered("v1")).await.unwrap();
        let second = emitter.emit(delivered("v1")).await.unwrap();
        let third = emitter.emit(delivered("v2")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.event_id, second.event_id);
        assert_eq!(first.event_key, second.event_key);
        assert!(third.created);
        assert_eq!(store.count("events"), 2);

        let stored = emitter.get(first.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.processing.attempts, 0);
    }

    #[tokio::test]
    async fn invalid_event_is_rejected_without_write() {
        let (emitter, store) = emitter();
        let mut draft = delivered("v1");
        draft.target_user_ids.clear();

        let err = emitter.emit(draft).await.unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(store.count("events"), 0);
    }

    #[tokio::test]
    async fn raw_payload_is_validated_against_type() {
        let (emitter, store) = emitter();
        let raw: RawEvent = serde_json::from_value(json!({
            "type": "Order.Shipped",
            "entityType": "order",
            "entityId": "O1",
            "targetUserIds": ["buyer-1"],
            "payload": {"orderId": "O1", "listingTitle": "Lamp"}
        }))
        .unwrap();

        let err = emitter.emit_raw(raw).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(store.count("events"), 0);
    }

    #[tokio::test]
    async fn raw_payload_emits_when_valid() {
        let (emitter, _) = emitter();
        let raw: RawEvent = serde_json::from_value(json!({
            "type": "Order.Delivered",
            "actorId": "seller-1",
            "entityType": "order",
            "entityId": "O1",
            "targetUserIds": ["buyer-1", "buyer-1"],
            "payload": {"orderId": "O1", "listingTitle": "Lamp"},
            "optionalHash": "v1"
        }))
        .unwrap();

        let result = emitter.emit_raw(raw).await.unwrap();

        assert!(result.created);
        assert_eq!(result.event_key, delivered("v1").event_key());
        let stored = emitter.get(result.event_id).await.unwrap().unwrap();
        assert_eq!(stored.target_user_ids.len(), 1);
    }
}
