//! Strongly-typed event payloads.
//!
//! `EventPayload` is a tagged union: the event type is the discriminant and each
//! variant carries its own payload struct. Payloads are validated once, when an event
//! is emitted, and again when a job renders them (the stored JSON may have been
//! written by an older build).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::bounds;
use crate::kind::EventType;

const MAX_TITLE_LEN: usize = 200;
const MAX_REASON_LEN: usize = 1000;

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for FieldError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Payload did not match the schema registered for its event type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {event_type} payload: {}", format_errors(.errors))]
pub struct PayloadError {
    pub event_type: EventType,
    pub errors: Vec<FieldError>,
}

fn format_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuctionOutbid {
    pub listing_id: String,
    pub listing_title: String,
    pub new_high_bid_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuctionWon {
    pub listing_id: String,
    pub listing_title: String,
    pub winning_bid_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderShipped {
    pub order_id: String,
    pub carrier: String,
    pub tracking_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderDelivered {
    pub order_id: String,
    pub listing_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderSlaApproaching {
    pub order_id: String,
    /// Whole hours left before the fulfilment deadline, clamped to `0..=MAX_HOURS`.
    pub hours_remaining: u32,
}

impl OrderSlaApproaching {
    pub fn from_deadline(
        order_id: impl Into<String>,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            hours_remaining: bounds::hours_until(now, deadline),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EscrowReleased {
    pub order_id: String,
    pub amount_cents: u64,
    /// Whole days the funds were held, clamped to `0..=MAX_DAYS`.
    pub held_days: u32,
}

impl EscrowReleased {
    pub fn from_hold(
        order_id: impl Into<String>,
        amount_cents: u64,
        held_since: DateTime<Utc>,
        released_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            amount_cents,
            held_days: bounds::days_since(held_since, released_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DisputeOpened {
    pub order_id: String,
    pub dispute_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListingFlagged {
    pub listing_id: String,
    pub reason: String,
}

/// Event payload keyed by event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "Auction.Outbid")]
    AuctionOutbid(AuctionOutbid),
    #[serde(rename = "Auction.Won")]
    AuctionWon(AuctionWon),
    #[serde(rename = "Order.Shipped")]
    OrderShipped(OrderShipped),
    #[serde(rename = "Order.Delivered")]
    OrderDelivered(OrderDelivered),
    #[serde(rename = "Order.SlaApproaching")]
    OrderSlaApproaching(OrderSlaApproaching),
    #[serde(rename = "Escrow.Released")]
    EscrowReleased(EscrowReleased),
    #[serde(rename = "Dispute.Opened")]
    DisputeOpened(DisputeOpened),
    #[serde(rename = "Listing.Flagged")]
    ListingFlagged(ListingFlagged),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::AuctionOutbid(_) => EventType::AuctionOutbid,
            EventPayload::AuctionWon(_) => EventType::AuctionWon,
            EventPayload::OrderShipped(_) => EventType::OrderShipped,
            EventPayload::OrderDelivered(_) => EventType::OrderDelivered,
            EventPayload::OrderSlaApproaching(_) => EventType::OrderSlaApproaching,
            EventPayload::EscrowReleased(_) => EventType::EscrowReleased,
            EventPayload::DisputeOpened(_) => EventType::DisputeOpened,
            EventPayload::ListingFlagged(_) => EventType::ListingFlagged,
        }
    }

    /// Validate an untyped payload against the schema for `event_type`.
    pub fn from_raw(event_type: EventType, raw: JsonValue) -> Result<Self, PayloadError> {
        let tagged = serde_json::json!({ "type": event_type.as_str(), "data": raw });
        let payload: EventPayload = serde_json::from_value(tagged).map_err(|e| PayloadError {
            event_type,
            errors: vec![FieldError::new("payload", e.to_string())],
        })?;
        payload.validate()?;
        Ok(payload)
    }

    /// The variant's own fields as JSON (without the type tag).
    pub fn data(&self) -> JsonValue {
        let tagged = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        match tagged {
            JsonValue::Object(mut map) => map.remove("data").unwrap_or(JsonValue::Null),
            _ => JsonValue::Null,
        }
    }

    /// Field-level rules that the type system cannot express.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let mut errors = Vec::new();

        match self {
            EventPayload::AuctionOutbid(p) => {
                require_text(&mut errors, "listingId", &p.listing_id, MAX_TITLE_LEN);
                require_text(&mut errors, "listingTitle", &p.listing_title, MAX_TITLE_LEN);
                require_positive(&mut errors, "newHighBidCents", p.new_high_bid_cents);
            }
            EventPayload::AuctionWon(p) => {
                require_text(&mut errors, "listingId", &p.listing_id, MAX_TITLE_LEN);
                require_text(&mut errors, "listingTitle", &p.listing_title, MAX_TITLE_LEN);
                require_positive(&mut errors, "winningBidCents", p.winning_bid_cents);
            }
            EventPayload::OrderShipped(p) => {
                require_text(&mut errors, "orderId", &p.order_id, MAX_TITLE_LEN);
                require_text(&mut errors, "carrier", &p.carrier, MAX_TITLE_LEN);
                require_text(&mut errors, "trackingNumber", &p.tracking_number, MAX_TITLE_LEN);
            }
            EventPayload::OrderDelivered(p) => {
                require_text(&mut errors, "orderId", &p.order_id, MAX_TITLE_LEN);
                require_text(&mut errors, "listingTitle", &p.listing_title, MAX_TITLE_LEN);
            }
            EventPayload::OrderSlaApproaching(p) => {
                require_text(&mut errors, "orderId", &p.order_id, MAX_TITLE_LEN);
                if p.hours_remaining > bounds::MAX_HOURS {
                    errors.push(FieldError::new(
                        "hoursRemaining",
                        format!("must be at most {}", bounds::MAX_HOURS),
                    ));
                }
            }
            EventPayload::EscrowReleased(p) => {
                require_text(&mut errors, "orderId", &p.order_id, MAX_TITLE_LEN);
                require_positive(&mut errors, "amountCents", p.amount_cents);
                if p.held_days > bounds::MAX_DAYS {
                    errors.push(FieldError::new(
                        "heldDays",
                        format!("must be at most {}", bounds::MAX_DAYS),
                    ));
                }
            }
            EventPayload::DisputeOpened(p) => {
                require_text(&mut errors, "orderId", &p.order_id, MAX_TITLE_LEN);
                require_text(&mut errors, "disputeId", &p.dispute_id, MAX_TITLE_LEN);
                require_text(&mut errors, "reason", &p.reason, MAX_REASON_LEN);
            }
            EventPayload::ListingFlagged(p) => {
                require_text(&mut errors, "listingId", &p.listing_id, MAX_TITLE_LEN);
                require_text(&mut errors, "reason", &p.reason, MAX_REASON_LEN);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PayloadError {
                event_type: self.event_type(),
                errors,
            })
        }
    }
}

fn require_text(errors: &mut Vec<FieldError>, field: &str, value: &str, max_len: usize) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    } else if value.chars().count() > max_len {
        errors.push(FieldError::new(field, format!("must be at most {max_len} characters")));
    }
}

fn require_positive(errors: &mut Vec<FieldError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(FieldError::new(field, "must be greater than zero"));
    }
}
