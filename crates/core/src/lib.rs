//! `courier-core`: building blocks shared by the notification pipeline.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): identifiers,
//! the error model, value objects, optimistic-concurrency expectations and the clock
//! abstraction used to make time-dependent decisions testable.

pub mod address;
pub mod clock;
pub mod document;
pub mod error;
pub mod id;
pub mod timestamp;
pub mod value_object;
pub mod version;

pub use address::EmailAddress;
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::Document;
pub use error::{DomainError, DomainResult};
pub use id::{EntityId, EventId, JobId, UserId};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
