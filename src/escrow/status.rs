//! Trade Status Definitions
//!
//! Status IDs are designed for PostgreSQL storage as SMALLINT.
//! Terminal statuses: COMPLETED (40), CANCELLED (-10), REFUNDED (-20)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Escrow transaction lifecycle status
///
/// Happy path: PENDING -> DEPOSITED -> SHIPPING -> COMPLETED
/// Arbitrated: SHIPPING -> DISPUTED -> {COMPLETED | REFUNDED}
/// Abandonment: PENDING -> CANCELLED (only while unfunded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TradeStatus {
    /// Room created, waiting for counterpart and funding
    Pending = 0,

    /// Buyer's funds are held in escrow - fee split is fixed from here on
    Deposited = 10,

    /// Seller marked the goods shipped; dispute window runs from here
    Shipping = 20,

    /// Terminal: seller was paid out
    Completed = 40,

    /// Buyer or seller contested the trade, staff arbitration pending
    Disputed = 30,

    /// Terminal: abandoned before any funds moved
    Cancelled = -10,

    /// Terminal: escrowed funds returned to the buyer
    Refunded = -20,
}

impl TradeStatus {
    /// Check if this is a terminal status (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Completed | TradeStatus::Cancelled | TradeStatus::Refunded
        )
    }

    /// True while escrowed funds are held by the platform.
    #[inline]
    pub fn holds_funds(&self) -> bool {
        matches!(
            self,
            TradeStatus::Deposited | TradeStatus::Shipping | TradeStatus::Disputed
        )
    }

    /// Get the numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TradeStatus::Pending),
            10 => Some(TradeStatus::Deposited),
            20 => Some(TradeStatus::Shipping),
            30 => Some(TradeStatus::Disputed),
            40 => Some(TradeStatus::Completed),
            -10 => Some(TradeStatus::Cancelled),
            -20 => Some(TradeStatus::Refunded),
            _ => None,
        }
    }

    /// Get human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Deposited => "DEPOSITED",
            TradeStatus::Shipping => "SHIPPING",
            TradeStatus::Disputed => "DISPUTED",
            TradeStatus::Completed => "COMPLETED",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TradeStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TradeStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TradeStatus::Completed.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(TradeStatus::Refunded.is_terminal());

        assert!(!TradeStatus::Pending.is_terminal());
        assert!(!TradeStatus::Deposited.is_terminal());
        assert!(!TradeStatus::Shipping.is_terminal());
        assert!(!TradeStatus::Disputed.is_terminal());
    }

    #[test]
    fn test_holds_funds() {
        assert!(TradeStatus::Deposited.holds_funds());
        assert!(TradeStatus::Shipping.holds_funds());
        assert!(TradeStatus::Disputed.holds_funds());

        assert!(!TradeStatus::Pending.holds_funds());
        assert!(!TradeStatus::Completed.holds_funds());
        assert!(!TradeStatus::Cancelled.holds_funds());
        assert!(!TradeStatus::Refunded.holds_funds());
    }

    #[test]
    fn test_status_id_roundtrip() {
        let statuses = [
            TradeStatus::Pending,
            TradeStatus::Deposited,
            TradeStatus::Shipping,
            TradeStatus::Disputed,
            TradeStatus::Completed,
            TradeStatus::Cancelled,
            TradeStatus::Refunded,
        ];

        for status in statuses {
            let id = status.id();
            let recovered = TradeStatus::from_id(id).unwrap();
            assert_eq!(status, recovered);
        }
    }

    #[test]
    fn test_invalid_status_id() {
        assert!(TradeStatus::from_id(999).is_none());
        assert!(TradeStatus::from_id(-999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TradeStatus::Pending.to_string(), "PENDING");
        assert_eq!(TradeStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(TradeStatus::Refunded.to_string(), "REFUNDED");
    }
}
