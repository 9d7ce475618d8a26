//! Email templates, one per event type.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::kind::EventType;
use crate::payload::{EventPayload, PayloadError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    Outbid,
    AuctionWon,
    OrderShipped,
    OrderDelivered,
    SlaReminder,
    EscrowReleased,
    DisputeAlert,
    ListingFlaggedAlert,
}

/// A concrete message ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// The stored payload can no longer be rendered. Permanent: retrying cannot fix it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("template payload rejected: {0}")]
    InvalidPayload(#[from] PayloadError),
}

impl EmailTemplate {
    pub fn for_event(event_type: EventType) -> Self {
        match event_type {
            EventType::AuctionOutbid => EmailTemplate::Outbid,
            EventType::AuctionWon => EmailTemplate::AuctionWon,
            EventType::OrderShipped => EmailTemplate::OrderShipped,
            EventType::OrderDelivered => EmailTemplate::OrderDelivered,
            EventType::OrderSlaApproaching => EmailTemplate::SlaReminder,
            EventType::EscrowReleased => EmailTemplate::EscrowReleased,
            EventType::DisputeOpened => EmailTemplate::DisputeAlert,
            EventType::ListingFlagged => EmailTemplate::ListingFlaggedAlert,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            EmailTemplate::Outbid => EventType::AuctionOutbid,
            EmailTemplate::AuctionWon => EventType::AuctionWon,
            EmailTemplate::OrderShipped => EventType::OrderShipped,
            EmailTemplate::OrderDelivered => EventType::OrderDelivered,
            EmailTemplate::SlaReminder => EventType::OrderSlaApproaching,
            EmailTemplate::EscrowReleased => EventType::EscrowReleased,
            EmailTemplate::DisputeAlert => EventType::DisputeOpened,
            EmailTemplate::ListingFlaggedAlert => EventType::ListingFlagged,
        }
    }

    /// Re-validate the stored payload and render it.
    pub fn render(
        &self,
        template_payload: &JsonValue,
        recipient_name: Option<&str>,
    ) -> Result<RenderedEmail, RenderError> {
        let payload = EventPayload::from_raw(self.event_type(), template_payload.clone())?;
        let greeting = match recipient_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("Hi {name},"),
            None => "Hi there,".to_string(),
        };

        let (subject, lines) = match &payload {
            EventPayload::AuctionOutbid(p) => (
                format!("You've been outbid on {}", p.listing_title),
                vec![
                    format!(
                        "Someone placed a higher bid of {} on \"{}\".",
                        format_cents(p.new_high_bid_cents),
                        p.listing_title
                    ),
                    "Place a new bid before the auction closes to stay in the lead.".to_string(),
                ],
            ),
            EventPayload::AuctionWon(p) => (
                format!("You won {}", p.listing_title),
                vec![
                    format!(
                        "Your winning bid of {} on \"{}\" has been accepted.",
                        format_cents(p.winning_bid_cents),
                        p.listing_title
                    ),
                    "Complete checkout to secure your item.".to_string(),
                ],
            ),
            EventPayload::OrderShipped(p) => (
                format!("Order {} has shipped", p.order_id),
                vec![format!(
                    "Your order is on its way with {}. Tracking number: {}.",
                    p.carrier, p.tracking_number
                )],
            ),
            EventPayload::OrderDelivered(p) => (
                format!("\"{}\" was delivered", p.listing_title),
                vec![
                    format!("Order {} has been marked as delivered.", p.order_id),
                    "If something is wrong, you can open a dispute from the order page."
                        .to_string(),
                ],
            ),
            EventPayload::OrderSlaApproaching(p) => (
                format!("Order {} needs to ship soon", p.order_id),
                vec![format!(
                    "You have {} hour{} left to ship order {}.",
                    p.hours_remaining,
                    if p.hours_remaining == 1 { "" } else { "s" },
                    p.order_id
                )],
            ),
            EventPayload::EscrowReleased(p) => (
                format!("Funds released for order {}", p.order_id),
                vec![format!(
                    "{} held for {} day{} has been released to your account.",
                    format_cents(p.amount_cents),
                    p.held_days,
                    if p.held_days == 1 { "" } else { "s" }
                )],
            ),
            EventPayload::DisputeOpened(p) => (
                format!("[Admin] Dispute {} opened on order {}", p.dispute_id, p.order_id),
                vec![format!("Reason given: {}", p.reason)],
            ),
            EventPayload::ListingFlagged(p) => (
                format!("[Admin] Listing {} was flagged", p.listing_id),
                vec![format!("Reason given: {}", p.reason)],
            ),
        };

        let mut body = greeting;
        for line in lines {
            body.push_str("\n\n");
            body.push_str(&line);
        }
        Ok(RenderedEmail { subject, body })
    }
}

fn format_cents(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
