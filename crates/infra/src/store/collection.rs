//! Typed access to one collection, including optimistic read-modify-write.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use courier_core::{Document, ExpectedVersion};

use super::query::DocumentQuery;
use super::r#trait::{DocumentStore, StoreError, StoredDocument};

/// How many times a transaction body is re-run after losing a revision race.
const MAX_TX_ATTEMPTS: u32 = 5;

/// Decision returned by a transaction body.
#[derive(Debug)]
pub enum Tx<T, R> {
    /// Commit `T` (conditionally on the revision that was read) and return `R`.
    Write(T, R),
    /// Leave the document untouched and return `R`.
    Abort(R),
}

/// Rows returned by [`Collection::scan`].
#[derive(Debug)]
pub struct Scan<T> {
    pub documents: Vec<T>,
    /// Ids of matching rows that did not decode as `T`
    pub undecodable: Vec<String>,
}

/// Typed view over a collection of `T` documents.
#[derive(Debug)]
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T: Document> Collection<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _doc: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        T::COLLECTION
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(doc) => Ok(Some(decode(&doc)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` when the document was created, `false` when it already existed.
    pub async fn create_if_absent(&self, doc: &T) -> Result<bool, StoreError> {
        let id = doc.document_id();
        let body = encode(doc, &id)?;
        self.store.create_if_absent(T::COLLECTION, &id, body).await
    }

    /// Unconditional upsert.
    pub async fn put(&self, doc: &T) -> Result<(), StoreError> {
        let id = doc.document_id();
        let body = encode(doc, &id)?;
        self.store
            .compare_and_put(T::COLLECTION, &id, body, ExpectedVersion::Any)
            .await
            .map(|_| ())
    }

    pub async fn query(&self, query: &DocumentQuery) -> Result<Vec<T>, StoreError> {
        self.store
            .query(T::COLLECTION, query)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    /// Like [`Collection::query`], but a row that does not decode is logged and
    /// reported by id instead of failing the whole read.
    pub async fn scan(&self, query: &DocumentQuery) -> Result<Scan<T>, StoreError> {
        let rows = self.store.query(T::COLLECTION, query).await?;
        let mut scan = Scan {
            documents: Vec::with_capacity(rows.len()),
            undecodable: Vec::new(),
        };
        for row in &rows {
            match decode(row) {
                Ok(doc) => scan.documents.push(doc),
                Err(err) => {
                    warn!(collection = T::COLLECTION, id = %row.id, error = %err, "skipping undecodable document");
                    scan.undecodable.push(row.id.clone());
                }
            }
        }
        Ok(scan)
    }

    /// Single-document read-modify-write.
    ///
    /// `body` sees the current document (or `None`) and decides. A `Tx::Write` is
    /// committed only if nobody else wrote the document in between; otherwise `body`
    /// runs again on the fresh state. `body` must therefore be free of side effects.
    pub async fn transact<R, F>(&self, id: &str, mut body: F) -> Result<R, StoreError>
    where
        F: FnMut(Option<T>) -> Result<Tx<T, R>, StoreError> + Send,
        R: Send,
    {
        for attempt in 1..=MAX_TX_ATTEMPTS {
            let current = self.store.get(T::COLLECTION, id).await?;
            let (revision, snapshot) = match &current {
                Some(doc) => (Some(doc.revision), Some(decode(doc)?)),
                None => (None, None),
            };

            match body(snapshot)? {
                Tx::Abort(result) => return Ok(result),
                Tx::Write(next, result) => {
                    let encoded = encode(&next, id)?;
                    let expected = match revision {
                        Some(rev) => ExpectedVersion::Exact(rev),
                        None => ExpectedVersion::Absent,
                    };
                    match self
                        .store
                        .compare_and_put(T::COLLECTION, id, encoded, expected)
                        .await
                    {
                        Ok(_) => return Ok(result),
                        Err(err) if err.is_conflict() => {
                            debug!(
                                collection = T::COLLECTION,
                                id,
                                attempt,
                                "transaction lost a revision race; retrying"
                            );
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Err(StoreError::Contention {
            collection: T::COLLECTION.to_string(),
            id: id.to_string(),
            attempts: MAX_TX_ATTEMPTS,
        })
    }
}

fn encode<T: Document>(doc: &T, id: &str) -> Result<JsonValue, StoreError> {
    serde_json::to_value(doc).map_err(|e| StoreError::Serialization {
        collection: T::COLLECTION.to_string(),
        id: id.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: Document>(doc: &StoredDocument) -> Result<T, StoreError> {
    serde_json::from_value(doc.body.clone()).map_err(|e| StoreError::Serialization {
        collection: T::COLLECTION.to_string(),
        id: doc.id.clone(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        value: u32,
    }

    impl Document for Counter {
        const COLLECTION: &'static str = "counters";

        fn document_id(&self) -> String {
            self.id.clone()
        }
    }

    fn counters() -> Collection<Counter> {
        Collection::new(Arc::new(InMemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn transact_writes_and_returns_result() {
        let c = counters();
        c.put(&Counter { id: "a".into(), value: 1 }).await.unwrap();

        let seen = c
            .transact("a", |current| {
                let mut counter = current.expect("exists");
                let before = counter.value;
                counter.value += 1;
                Ok(Tx::Write(counter, before))
            })
            .await
            .unwrap();

        assert_eq!(seen, 1);
        assert_eq!(c.get("a").await.unwrap().unwrap().value, 2);
    }

    #[tokio::test]
    async fn transact_abort_leaves_document_untouched() {
        let c = counters();
        let result = c
            .transact("missing", |current| Ok(Tx::<Counter, _>::Abort(current.is_none())))
            .await
            .unwrap();
        assert!(result);
        assert!(c.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_reports_rows_that_do_not_decode() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let c: Collection<Counter> = Collection::new(store.clone());
        c.put(&Counter { id: "a".into(), value: 1 }).await.unwrap();
        store
            .create_if_absent("counters", "bad", serde_json::json!({"id": "bad", "value": "x"}))
            .await
            .unwrap();

        assert!(c.query(&DocumentQuery::new()).await.is_err());

        let scan = c.scan(&DocumentQuery::new()).await.unwrap();
        assert_eq!(scan.documents, vec![Counter { id: "a".into(), value: 1 }]);
        assert_eq!(scan.undecodable, vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_increments_are_serialized() {
        let c = counters();
        c.put(&Counter { id: "a".into(), value: 0 }).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let c = c.clone();
            tasks.push(tokio::spawn(async move {
                c.transact("a", |current| {
                    let mut counter = current.expect("exists");
                    counter.value += 1;
                    Ok(Tx::Write(counter, ()))
                })
                .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(c.get("a").await.unwrap().unwrap().value, 4);
    }
}
