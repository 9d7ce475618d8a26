//! The closed catalogue of event types.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use courier_core::DomainError;

/// Identifies a domain occurrence. Serialized as a dotted name (`"Auction.Outbid"`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "Auction.Outbid")]
    AuctionOutbid,
    #[serde(rename = "Auction.Won")]
    AuctionWon,
    #[serde(rename = "Order.Shipped")]
    OrderShipped,
    #[serde(rename = "Order.Delivered")]
    OrderDelivered,
    #[serde(rename = "Order.SlaApproaching")]
    OrderSlaApproaching,
    #[serde(rename = "Escrow.Released")]
    EscrowReleased,
    #[serde(rename = "Dispute.Opened")]
    DisputeOpened,
    #[serde(rename = "Listing.Flagged")]
    ListingFlagged,
}

/// Who an event is addressed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Only the users named in `targetUserIds`.
    Recipients,
    /// Operators: named targets plus every admin known to the user directory.
    Admins,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::AuctionOutbid,
        EventType::AuctionWon,
        EventType::OrderShipped,
        EventType::OrderDelivered,
        EventType::OrderSlaApproaching,
        EventType::EscrowReleased,
        EventType::DisputeOpened,
        EventType::ListingFlagged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AuctionOutbid => "Auction.Outbid",
            EventType::AuctionWon => "Auction.Won",
            EventType::OrderShipped => "Order.Shipped",
            EventType::OrderDelivered => "Order.Delivered",
            EventType::OrderSlaApproaching => "Order.SlaApproaching",
            EventType::EscrowReleased => "Escrow.Released",
            EventType::DisputeOpened => "Dispute.Opened",
            EventType::ListingFlagged => "Listing.Flagged",
        }
    }

    pub fn audience(&self) -> Audience {
        match self {
            EventType::DisputeOpened | EventType::ListingFlagged => Audience::Admins,
            EventType::AuctionOutbid
            | EventType::AuctionWon
            | EventType::OrderShipped
            | EventType::OrderDelivered
            | EventType::OrderSlaApproaching
            | EventType::EscrowReleased => Audience::Recipients,
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown event type '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!("Order.Teleported".parse::<EventType>().is_err());
    }

    #[test]
    fn admin_alerts_target_admins() {
        assert_eq!(EventType::DisputeOpened.audience(), Audience::Admins);
        assert_eq!(EventType::AuctionOutbid.audience(), Audience::Recipients);
    }
}
