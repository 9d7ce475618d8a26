//! Marketplace notification events.
//!
//! This crate is pure: it defines the closed catalogue of event types, their
//! strongly-typed payloads (validated once at construction), the persisted event
//! record with its idempotency key, and the email templates each event renders to.
//! Nothing here performs IO.

pub mod bounds;
pub mod event;
pub mod kind;
pub mod payload;
pub mod template;

pub use event::{EventKey, EventRecord, EventStatus, NewEvent, ProcessingState};
pub use kind::{Audience, EventType};
pub use payload::{
    AuctionOutbid, AuctionWon, DisputeOpened, EscrowReleased, EventPayload, FieldError,
    ListingFlagged, OrderDelivered, OrderShipped, OrderSlaApproaching, PayloadError,
};
pub use template::{EmailTemplate, RenderError, RenderedEmail};
