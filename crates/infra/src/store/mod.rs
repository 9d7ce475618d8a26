//! Document store abstraction.
//!
//! The pipeline coordinates exclusively through a collection-oriented document store
//! with **single-document optimistic transactions**: read a document and its
//! revision, decide, then write conditionally on the revision being unchanged. If
//! another writer got there first the decision is re-run against fresh state.
//!
//! ## Components
//!
//! - `DocumentStore`: raw, object-safe storage primitives over JSON documents
//! - `Collection<T>`: typed access plus the `transact` read-modify-write helper
//! - `DocumentQuery`: equality filters + order-by + limit
//! - `InMemoryDocumentStore`: tests/dev
//! - `PostgresDocumentStore`: JSONB-backed production store (`postgres` feature)

pub mod collection;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use collection::{Collection, Scan, Tx};
pub use in_memory::InMemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;
pub use query::{DocumentQuery, SortOrder};
pub use r#trait::{DocumentStore, StoreError, StoredDocument};
