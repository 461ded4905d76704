//! Structured state-change events.
//!
//! One event is published per committed transition. Delivery is at-least-once;
//! consumers dedupe by `event_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{TransactionId, UserId};
use crate::escrow::status::TradeStatus;

/// What happened, in domain terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Funded,
    Shipped,
    Completed,
    Disputed,
    ResolvedRelease,
    ResolvedRefund,
    Cancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Funded => "funded",
            EventKind::Shipped => "shipped",
            EventKind::Completed => "completed",
            EventKind::Disputed => "disputed",
            EventKind::ResolvedRelease => "resolved_release",
            EventKind::ResolvedRefund => "resolved_refund",
            EventKind::Cancelled => "cancelled",
        }
    }
}

/// A committed state transition, as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Unique per emission; consumers dedupe on this.
    pub event_id: String,
    pub transaction_id: TransactionId,
    pub kind: EventKind,
    pub from: TradeStatus,
    pub to: TradeStatus,
    pub actor_id: UserId,
    pub timestamp: DateTime<Utc>,
    /// Free-form extras (dispute reason, amounts) for consumers that want them.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl TransitionEvent {
    pub fn new(
        transaction_id: TransactionId,
        kind: EventKind,
        from: TradeStatus,
        to: TradeStatus,
        actor_id: UserId,
    ) -> Self {
        Self {
            event_id: ulid::Ulid::new().to_string(),
            transaction_id,
            kind,
            from,
            to,
            actor_id,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_roundtrip() {
        let event = TransitionEvent::new(
            TransactionId::new(),
            EventKind::Funded,
            TradeStatus::Pending,
            TradeStatus::Deposited,
            42,
        )
        .with_payload(serde_json::json!({ "amount": "100000" }));

        let json = serde_json::to_string(&event).unwrap();
        let back: TransitionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.kind, EventKind::Funded);
        assert_eq!(back.to, TradeStatus::Deposited);
    }

    #[test]
    fn test_event_ids_unique() {
        let id = TransactionId::new();
        let a = TransitionEvent::new(id, EventKind::Shipped, TradeStatus::Deposited, TradeStatus::Shipping, 1);
        let b = TransitionEvent::new(id, EventKind::Shipped, TradeStatus::Deposited, TradeStatus::Shipping, 1);
        assert_ne!(a.event_id, b.event_id);
    }
}
