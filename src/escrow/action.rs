//! Transition table for the escrow state machine.
//!
//! Every status change in the system resolves through this module. Callers
//! never write `status` directly; the engine asks `resolve` for the target
//! status and the store applies it with a CAS check.
//!
//! ```text
//! PENDING --fund--> DEPOSITED --ship--> SHIPPING --confirm--> COMPLETED
//!    |                  |                  |
//!    +--cancel-->       +--dispute--+      +--dispute (within window)
//!    CANCELLED          v                  v
//!                    DISPUTED --release--> COMPLETED
//!                          \----refund---> REFUNDED
//! ```

use chrono::{DateTime, Duration, Utc};

use super::actor::Actor;
use super::model::Transaction;
use super::status::TradeStatus;
use crate::error::EscrowError;

/// A requested state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowAction {
    /// Buyer funds the escrow (amount reserved from the buyer's wallet).
    Fund,
    /// Seller marks the goods shipped.
    Ship,
    /// Buyer confirms receipt; seller is paid out.
    ConfirmReceipt,
    /// A party contests the trade.
    Dispute { reason: String },
    /// Staff resolves a dispute in the seller's favour.
    ResolveRelease,
    /// Staff resolves a dispute in the buyer's favour.
    ResolveRefund,
    /// Abandon an unfunded trade.
    Cancel,
}

impl EscrowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowAction::Fund => "fund",
            EscrowAction::Ship => "ship",
            EscrowAction::ConfirmReceipt => "confirm_receipt",
            EscrowAction::Dispute { .. } => "dispute",
            EscrowAction::ResolveRelease => "resolve_release",
            EscrowAction::ResolveRefund => "resolve_refund",
            EscrowAction::Cancel => "cancel",
        }
    }
}

/// Who may trigger an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerRole {
    Buyer,
    Seller,
    /// Buyer or seller.
    EitherParty,
    /// Either party or staff.
    PartyOrStaff,
    /// Moderator or admin only.
    Staff,
}

/// One row of the transition table: (from, action, trigger role, to).
struct Edge {
    from: TradeStatus,
    action: &'static str,
    role: TriggerRole,
    to: TradeStatus,
}

const TRANSITIONS: &[Edge] = &[
    Edge {
        from: TradeStatus::Pending,
        action: "fund",
        role: TriggerRole::Buyer,
        to: TradeStatus::Deposited,
    },
    Edge {
        from: TradeStatus::Deposited,
        action: "ship",
        role: TriggerRole::Seller,
        to: TradeStatus::Shipping,
    },
    Edge {
        from: TradeStatus::Shipping,
        action: "confirm_receipt",
        role: TriggerRole::Buyer,
        to: TradeStatus::Completed,
    },
    Edge {
        from: TradeStatus::Shipping,
        action: "dispute",
        role: TriggerRole::Buyer,
        to: TradeStatus::Disputed,
    },
    // Pre-shipment dispute: either party may escalate before anything ships
    Edge {
        from: TradeStatus::Deposited,
        action: "dispute",
        role: TriggerRole::EitherParty,
        to: TradeStatus::Disputed,
    },
    Edge {
        from: TradeStatus::Disputed,
        action: "resolve_release",
        role: TriggerRole::Staff,
        to: TradeStatus::Completed,
    },
    Edge {
        from: TradeStatus::Disputed,
        action: "resolve_refund",
        role: TriggerRole::Staff,
        to: TradeStatus::Refunded,
    },
    Edge {
        from: TradeStatus::Pending,
        action: "cancel",
        role: TriggerRole::PartyOrStaff,
        to: TradeStatus::Cancelled,
    },
];

/// True while a dispute may still be raised after shipment.
#[inline]
pub fn dispute_window_open(
    shipped_at: DateTime<Utc>,
    window_hours: i64,
    now: DateTime<Utc>,
) -> bool {
    now <= shipped_at + Duration::hours(window_hours)
}

/// Resolve an action against the current record: find the edge, check the
/// caller, check preconditions. Returns the target status without mutating
/// anything.
pub fn resolve(
    txn: &Transaction,
    action: &EscrowAction,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<TradeStatus, EscrowError> {
    let name = action.as_str();

    let edge = TRANSITIONS
        .iter()
        .find(|e| e.from == txn.status && e.action == name)
        .ok_or(EscrowError::InvalidTransition {
            from: txn.status,
            action: name,
        })?;

    let authorized = match edge.role {
        TriggerRole::Buyer => txn.is_buyer(actor.id),
        TriggerRole::Seller => txn.is_seller(actor.id),
        TriggerRole::EitherParty => txn.is_party(actor.id),
        TriggerRole::PartyOrStaff => txn.is_party(actor.id) || actor.is_staff(),
        TriggerRole::Staff => actor.is_staff(),
    };
    if !authorized {
        return Err(EscrowError::UnauthorizedTransition {
            from: txn.status,
            action: name,
        });
    }

    match action {
        EscrowAction::Fund => {
            if !txn.both_parties_present() {
                return Err(EscrowError::Validation(
                    "counterpart has not joined yet".into(),
                ));
            }
        }
        EscrowAction::Dispute { reason } => {
            if reason.trim().is_empty() {
                return Err(EscrowError::Validation("dispute reason required".into()));
            }
            // The window only runs once goods have shipped; a pre-shipment
            // dispute has no deadline.
            if let Some(shipped_at) = txn.shipped_at {
                if !dispute_window_open(shipped_at, txn.dispute_window_hours, now) {
                    return Err(EscrowError::WindowExpired {
                        deadline: shipped_at + Duration::hours(txn.dispute_window_hours),
                    });
                }
            }
        }
        _ => {}
    }

    Ok(edge.to)
}
