use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use courier_core::ExpectedVersion;

use super::query::DocumentQuery;

/// A raw document together with its revision.
///
/// Revisions start at 1 on creation and increase by one on every committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub revision: u64,
    pub body: JsonValue,
}

/// Document store operation error.
///
/// `Conflict` is expected under contention and is absorbed by `Collection::transact`.
/// `Contention` and `Serialization` concern one document; `Unavailable` means the
/// store itself misbehaved and is fatal for a sweep.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("transaction on {collection}/{id} gave up after {attempts} conflicting attempts")]
    Contention {
        collection: String,
        id: String,
        attempts: u32,
    },

    #[error("document {collection}/{id} could not be (de)serialized: {message}")]
    Serialization {
        collection: String,
        id: String,
        message: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// The failure is confined to one document; the rest of the store is usable.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_) | StoreError::Contention { .. } | StoreError::Serialization { .. }
        )
    }
}

/// Collection-oriented document store.
///
/// ## Implementation Requirements
///
/// - `compare_and_put` must be atomic per document: the revision check and the write
///   happen as one step, and a failed expectation returns `StoreError::Conflict`
/// - `create_if_absent` must never overwrite an existing document
/// - `query` applies all equality filters, then ordering, then the limit
///
/// There is no cross-document atomicity; callers never rely on it.
#[async_trait]
pub trait DocumentStore: Send + Sync + core::fmt::Debug {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Create a document unless one already exists. Returns `true` when created.
    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
    ) -> Result<bool, StoreError>;

    /// Conditional write. Returns the new revision.
    async fn compare_and_put(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError>;

    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}
