//! Recipient lookup.
//!
//! Deployments read recipients from the `users` collection of the pipeline's own
//! store ([`DocumentUserDirectory`]); tests use [`InMemoryUserDirectory`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_core::{Document, UserId};

use crate::store::{Collection, DocumentQuery, DocumentStore, SortOrder, StoreError};

/// Upper bound on admins returned by [`DocumentUserDirectory::admins`].
const MAX_ADMINS: usize = 100;

/// What the pipeline needs to know about a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub email_notifications: bool,
}

impl UserProfile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            display_name: None,
            email_notifications: true,
        }
    }

    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn opted_out(mut self) -> Self {
        self.email_notifications = false;
        self
    }
}

/// A user as stored in the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Receives admin alerts
    #[serde(default)]
    pub admin: bool,
}

impl Document for UserRecord {
    const COLLECTION: &'static str = "users";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for DirectoryError {
    fn from(value: StoreError) -> Self {
        DirectoryError::Unavailable(value.to_string())
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync + core::fmt::Debug {
    async fn lookup(&self, user_id: &UserId) -> Result<Option<UserProfile>, DirectoryError>;

    /// Users who receive admin alerts, in a stable order.
    async fn admins(&self) -> Result<Vec<UserId>, DirectoryError>;
}

/// Directory backed by the `users` collection.
#[derive(Debug, Clone)]
pub struct DocumentUserDirectory {
    users: Collection<UserRecord>,
}

impl DocumentUserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            users: Collection::new(store),
        }
    }

    /// Insert or replace a user.
    pub async fn put(&self, user: &UserRecord) -> Result<(), DirectoryError> {
        Ok(self.users.put(user).await?)
    }
}

#[async_trait]
impl UserDirectory for DocumentUserDirectory {
    async fn lookup(&self, user_id: &UserId) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self
            .users
            .get(user_id.as_str())
            .await?
            .map(|user| user.profile))
    }

    async fn admins(&self) -> Result<Vec<UserId>, DirectoryError> {
        let scan = self
            .users
            .scan(
                &DocumentQuery::new()
                    .where_eq("admin", true)
                    .order_by("id", SortOrder::Asc)
                    .limit(MAX_ADMINS),
            )
            .await?;
        Ok(scan.documents.into_iter().map(|user| user.id).collect())
    }
}

/// In-memory directory for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
    admins: RwLock<Vec<UserId>>,
    unavailable: AtomicBool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: UserId, profile: UserProfile) {
        self.users
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user_id, profile);
    }

    pub fn insert_admin(&self, user_id: UserId, profile: UserProfile) {
        self.insert(user_id.clone(), profile);
        let mut admins = self.admins.write().unwrap_or_else(|p| p.into_inner());
        if !admins.contains(&user_id) {
            admins.push(user_id);
        }
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup(&self, user_id: &UserId) -> Result<Option<UserProfile>, DirectoryError> {
        self.check()?;
        Ok(self
            .users
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(user_id)
            .cloned())
    }

    async fn admins(&self) -> Result<Vec<UserId>, DirectoryError> {
        self.check()?;
        Ok(self.admins.read().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_and_admins() {
        let dir = InMemoryUserDirectory::new();
        let alice = UserId::new("alice").unwrap();
        let root = UserId::new("root").unwrap();
        dir.insert(alice.clone(), UserProfile::new("alice@example.com").named("Alice"));
        dir.insert_admin(root.clone(), UserProfile::new("root@example.com"));
        dir.insert_admin(root.clone(), UserProfile::new("root@example.com"));

        let profile = dir.lookup(&alice).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
        assert!(profile.email_notifications);
        assert_eq!(dir.admins().await.unwrap(), vec![root]);
        assert!(dir.lookup(&UserId::new("ghost").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn document_directory_reads_the_users_collection() {
        let store = Arc::new(crate::store::InMemoryDocumentStore::new());
        let dir = DocumentUserDirectory::new(store.clone());
        let bea = UserId::new("bea").unwrap();
        let ops = UserId::new("ops").unwrap();
        dir.put(&UserRecord {
            id: bea.clone(),
            profile: UserProfile::new("bea@example.com").named("Bea"),
            admin: false,
        })
        .await
        .unwrap();
        dir.put(&UserRecord {
            id: ops.clone(),
            profile: UserProfile::new("ops@example.com"),
            admin: true,
        })
        .await
        .unwrap();

        let profile = dir.lookup(&bea).await.unwrap().unwrap();
        assert_eq!(profile.email.as_deref(), Some("bea@example.com"));
        assert_eq!(profile.display_name.as_deref(), Some("Bea"));
        assert!(dir.lookup(&UserId::new("ghost").unwrap()).await.unwrap().is_none());
        assert_eq!(dir.admins().await.unwrap(), vec![ops]);

        store.fail_next(1);
        assert!(matches!(dir.lookup(&bea).await, Err(DirectoryError::Unavailable(_))));
    }

    #[test]
    fn user_records_are_flat_documents() {
        let user = UserRecord {
            id: UserId::new("bea").unwrap(),
            profile: UserProfile::new("bea@example.com"),
            admin: true,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], "bea");
        assert_eq!(json["email"], "bea@example.com");
        assert_eq!(json["emailNotifications"], true);
        assert_eq!(json["admin"], true);
    }

    #[tokio::test]
    async fn unavailable_directory_errors() {
        let dir = InMemoryUserDirectory::new();
        dir.set_unavailable(true);
        assert!(dir.admins().await.is_err());
    }
}
