//! Strongly-typed identifiers used across the pipeline.
//!
//! Event and job ids are **deterministic**: they are derived from content (the event
//! idempotency key, or the originating event plus recipient) so that re-emitting or
//! re-processing the same logical occurrence addresses the same document.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6b1e_5c4a_9f0d_4c7e_8a21_3d5f_0e9b_7a41);
const JOB_NAMESPACE: Uuid = Uuid::from_u128(0x2f8d_91b3_47ac_4e1f_b6d2_c0a9_58e3_1d76);

/// Identifier of an event document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

/// Identifier of a delivery job document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

/// Identifier of a marketplace user (issued by the external auth system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Identifier of the domain object an event concerns (order, listing, user, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap an externally issued identifier.
            ///
            /// Fails when the identifier is empty or only whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_uuid_newtype!(EventId, "EventId");
impl_uuid_newtype!(JobId, "JobId");
impl_string_newtype!(UserId, "UserId");
impl_string_newtype!(EntityId, "EntityId");

impl EventId {
    /// Derive the document id for an idempotency key.
    pub fn from_event_key(event_key: &str) -> Self {
        Self(Uuid::new_v5(&EVENT_NAMESPACE, event_key.as_bytes()))
    }
}

impl JobId {
    /// Derive the job id for one recipient of an event.
    ///
    /// The same `(event, recipient)` pair always maps to the same job, so an event
    /// that is processed twice cannot enqueue a second email for a user.
    pub fn for_recipient(event_id: EventId, user_id: &UserId) -> Self {
        let name = format!("{}:{}", event_id, user_id.as_str());
        Self(Uuid::new_v5(&JOB_NAMESPACE, name.as_bytes()))
    }

    /// Random, time-ordered id for jobs that do not originate from an event.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}
