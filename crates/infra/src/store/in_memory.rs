use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use courier_core::ExpectedVersion;

use super::query::DocumentQuery;
use super::r#trait::{DocumentStore, StoreError, StoredDocument};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DocKey {
    collection: String,
    id: String,
}

#[derive(Debug, Clone)]
struct Slot {
    revision: u64,
    body: JsonValue,
}

/// In-memory document store with revision-checked writes.
///
/// Intended for tests/dev. Every operation takes the lock once, so a
/// `compare_and_put` is atomic with respect to every other operation.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<DocKey, Slot>>,
    /// Number of upcoming operations that fail with `Unavailable`.
    injected_failures: AtomicU32,
    /// Per collection: number of upcoming writes that fail with `Unavailable`.
    failing_writes: Mutex<HashMap<String, u32>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail as if the store were unreachable.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes to `collection` fail; reads keep working.
    pub fn fail_writes_to(&self, collection: &str, count: u32) {
        self.failing_writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(collection.to_string(), count);
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.docs
            .read()
            .map(|docs| docs.keys().filter(|k| k.collection == collection).count())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn check_writable(&self, collection: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut failing = self.failing_writes.lock().unwrap_or_else(|p| p.into_inner());
        match failing.get_mut(collection) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!("injected write failure on {collection}")))
            }
            _ => Ok(()),
        }
    }

    fn key(collection: &str, id: &str) -> DocKey {
        DocKey {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.check_available()?;
        let docs = self.docs.read().map_err(|_| poisoned())?;
        Ok(docs.get(&Self::key(collection, id)).map(|slot| StoredDocument {
            id: id.to_string(),
            revision: slot.revision,
            body: slot.body.clone(),
        }))
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
    ) -> Result<bool, StoreError> {
        self.check_writable(collection)?;
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        let key = Self::key(collection, id);
        if docs.contains_key(&key) {
            return Ok(false);
        }
        docs.insert(key, Slot { revision: 1, body });
        Ok(true)
    }

    async fn compare_and_put(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        self.check_writable(collection)?;
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        let key = Self::key(collection, id);
        let current = docs.get(&key).map(|slot| slot.revision);

        expected
            .check(current)
            .map_err(|e| StoreError::Conflict(format!("{collection}/{id}: {e}")))?;

        let revision = current.unwrap_or(0) + 1;
        docs.insert(key, Slot { revision, body });
        Ok(revision)
    }

    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.check_available()?;
        let docs = self.docs.read().map_err(|_| poisoned())?;

        let mut result: Vec<StoredDocument> = docs
            .iter()
            .filter(|(k, slot)| k.collection == collection && query.matches(&slot.body))
            .map(|(k, slot)| StoredDocument {
                id: k.id.clone(),
                revision: slot.revision,
                body: slot.body.clone(),
            })
            .collect();

        // Tie-break on id so equal sort keys come back in a stable order.
        result.sort_by(|a, b| query.compare(&a.body, &b.body).then_with(|| a.id.cmp(&b.id)));
        result.truncate(query.limit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::query::SortOrder;
    use serde_json::json;

    #[tokio::test]
    async fn create_if_absent_never_overwrites() {
        let store = InMemoryDocumentStore::new();
        assert!(store.create_if_absent("c", "1", json!({"v": 1})).await.unwrap());
        assert!(!store.create_if_absent("c", "1", json!({"v": 2})).await.unwrap());

        let doc = store.get("c", "1").await.unwrap().unwrap();
        assert_eq!(doc.body, json!({"v": 1}));
        assert_eq!(doc.revision, 1);
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let store = InMemoryDocumentStore::new();
        store.create_if_absent("c", "1", json!({"v": 1})).await.unwrap();

        let rev = store
            .compare_and_put("c", "1", json!({"v": 2}), ExpectedVersion::Exact(1))
            .await
            .unwrap();
        assert_eq!(rev, 2);

        let err = store
            .compare_and_put("c", "1", json!({"v": 3}), ExpectedVersion::Exact(1))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = InMemoryDocumentStore::new();
        for (id, status, at) in [("a", "queued", 3), ("b", "sent", 1), ("c", "queued", 2), ("d", "queued", 1)] {
            store
                .create_if_absent("jobs", id, json!({"status": status, "at": at}))
                .await
                .unwrap();
        }

        let q = DocumentQuery::new()
            .where_eq("status", "queued")
            .order_by("at", SortOrder::Asc)
            .limit(2);
        let ids: Vec<_> = store.query("jobs", &q).await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["d", "c"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryDocumentStore::new();
        store.fail_next(1);
        assert!(matches!(store.get("c", "1").await, Err(StoreError::Unavailable(_))));
        assert!(store.get("c", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_write_failures_target_one_collection() {
        let store = InMemoryDocumentStore::new();
        store.fail_writes_to("letters", 1);

        assert!(store.create_if_absent("jobs", "1", json!({})).await.unwrap());
        assert!(matches!(
            store.create_if_absent("letters", "1", json!({})).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get("letters", "1").await.unwrap().is_none());
        assert!(store.create_if_absent("letters", "1", json!({})).await.unwrap());
    }
}
