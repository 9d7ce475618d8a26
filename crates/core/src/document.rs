//! Document trait: identity of a record persisted in a store collection.

use serde::{de::DeserializeOwned, Serialize};

/// A record stored in a named collection of the document store.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the document lives in (e.g. `events`).
    const COLLECTION: &'static str;

    /// Document id within its collection.
    fn document_id(&self) -> String;
}
