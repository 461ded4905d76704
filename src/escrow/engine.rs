//! Escrow Engine
//!
//! Orchestrates state transitions: load current record, resolve the edge
//! against the transition table, compute effects, apply them through the
//! store's CAS update, then emit the event. Validation failures return a
//! typed error without mutating anything; a losing concurrent writer gets
//! `Conflict` and must re-read - there is no automatic retry of business
//! transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use super::action::{self, EscrowAction};
use super::actor::Actor;
use super::model::{
    fee_for, NewTransaction, PartySide, ProductDetails, Transaction, TransitionPatch,
};
use super::status::TradeStatus;
use super::store::{EscrowStore, WalletOp};
use crate::core_types::{TransactionId, UserId};
use crate::error::EscrowError;
use crate::notify::{EventKind, EventNotifier, TransitionEvent};

pub struct EscrowEngine {
    store: Arc<dyn EscrowStore>,
    notifier: Arc<EventNotifier>,
}

impl EscrowEngine {
    pub fn new(store: Arc<dyn EscrowStore>, notifier: Arc<EventNotifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<dyn EscrowStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    /// Create a new escrow room. The caller becomes the side it declared.
    pub async fn create(
        &self,
        actor: &Actor,
        mut input: NewTransaction,
    ) -> Result<Transaction, EscrowError> {
        input.creator = actor.id;
        let txn = input.build()?;
        self.store.create(&txn).await?;
        info!(
            transaction_id = %txn.id,
            code = %txn.code,
            amount = %txn.amount,
            "escrow transaction created"
        );
        Ok(txn)
    }

    pub async fn get(&self, id: TransactionId) -> Result<Transaction, EscrowError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(id.to_string()))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Transaction, EscrowError> {
        self.store
            .get_by_code(code)
            .await?
            .ok_or_else(|| EscrowError::NotFound(code.to_string()))
    }

    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<Transaction>, EscrowError> {
        self.store.list_for_user(user).await
    }

    /// Counterpart joins a pending room on the declared side.
    pub async fn join(
        &self,
        actor: &Actor,
        id: TransactionId,
        side: PartySide,
        details: Option<ProductDetails>,
    ) -> Result<Transaction, EscrowError> {
        // Only a joining seller may supply product details
        let details = match side {
            PartySide::Seller => details,
            PartySide::Buyer => None,
        };
        self.store.join(id, side, actor.id, details).await
    }

    /// Edit descriptive metadata; allowed to the present party only, while
    /// pending and before the counterpart joins.
    pub async fn update_details(
        &self,
        actor: &Actor,
        id: TransactionId,
        details: ProductDetails,
    ) -> Result<Transaction, EscrowError> {
        let txn = self.get(id).await?;
        if !txn.is_party(actor.id) {
            return Err(EscrowError::UnauthorizedTransition {
                from: txn.status,
                action: "update_details",
            });
        }
        self.store.update_details(id, details).await
    }

    /// Record the caller's advisory acknowledgement flag. Available any time
    /// after funding; does not gate any transition.
    pub async fn acknowledge(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Transaction, EscrowError> {
        let txn = self.get(id).await?;
        if txn.deposited_at.is_none() {
            return Err(EscrowError::Validation(
                "acknowledgement opens once the trade is funded".into(),
            ));
        }
        let side = if txn.is_buyer(actor.id) {
            PartySide::Buyer
        } else if txn.is_seller(actor.id) {
            PartySide::Seller
        } else {
            return Err(EscrowError::UnauthorizedTransition {
                from: txn.status,
                action: "acknowledge",
            });
        };
        self.store.set_confirmed(id, side).await
    }

    /// Staff member takes ownership of a dispute.
    pub async fn assign_moderator(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Transaction, EscrowError> {
        let txn = self.get(id).await?;
        if !actor.is_staff() {
            return Err(EscrowError::UnauthorizedTransition {
                from: txn.status,
                action: "assign_moderator",
            });
        }
        let patch = TransitionPatch {
            moderator_id: Some(actor.id),
            ..Default::default()
        };
        // CAS on Disputed so a concurrent resolution wins cleanly
        self.store
            .apply_transition(id, TradeStatus::Disputed, &patch, &[])
            .await
    }

    /// Request a state transition.
    pub async fn transition(
        &self,
        actor: &Actor,
        id: TransactionId,
        action: EscrowAction,
    ) -> Result<Transaction, EscrowError> {
        let txn = self.get(id).await?;
        let now = Utc::now();

        let target = action::resolve(&txn, &action, actor, now)?;
        let from = txn.status;
        let effects = build_effects(&txn, &action, actor, target, now)?;

        let updated = self
            .store
            .apply_transition(id, from, &effects.patch, &effects.wallet_ops)
            .await?;

        info!(
            transaction_id = %id,
            from = %from,
            to = %updated.status,
            actor = actor.id,
            action = action.as_str(),
            "escrow transition committed"
        );

        let event = TransitionEvent::new(id, effects.kind, from, updated.status, actor.id)
            .with_payload(effects.payload);
        self.notifier.publish(event).await;

        Ok(updated)
    }
}

struct Effects {
    patch: TransitionPatch,
    wallet_ops: Vec<WalletOp>,
    kind: EventKind,
    payload: serde_json::Value,
}

/// Compute the patch, wallet deltas, and event for an authorized edge.
///
/// Pure with respect to the store: nothing here mutates state.
fn build_effects(
    txn: &Transaction,
    action: &EscrowAction,
    actor: &Actor,
    target: TradeStatus,
    now: DateTime<Utc>,
) -> Result<Effects, EscrowError> {
    let mut patch = TransitionPatch::to(target);

    let effects = match action {
        EscrowAction::Fund => {
            let buyer = party(txn.buyer_id)?;
            let fee = fee_for(txn.amount, txn.fee_percent);
            let seller_receives = txn.amount - txn.fee_bearer.seller_share(fee);
            let buyer_debit = txn.amount + txn.fee_bearer.buyer_share(fee);

            patch.fee_amount = Some(fee);
            patch.seller_receives = Some(seller_receives);
            patch.deposited_at = Some(now);

            Effects {
                patch,
                wallet_ops: vec![WalletOp::Debit {
                    user: buyer,
                    amount: buyer_debit,
                }],
                kind: EventKind::Funded,
                payload: serde_json::json!({
                    "amount": txn.amount,
                    "fee_amount": fee,
                    "seller_receives": seller_receives,
                }),
            }
        }
        EscrowAction::Ship => {
            patch.shipped_at = Some(now);
            Effects {
                patch,
                wallet_ops: vec![],
                kind: EventKind::Shipped,
                payload: serde_json::Value::Null,
            }
        }
        EscrowAction::ConfirmReceipt => {
            let seller = party(txn.seller_id)?;
            let receives = fixed_seller_receives(txn)?;
            patch.completed_at = Some(now);
            Effects {
                patch,
                wallet_ops: vec![WalletOp::Credit {
                    user: seller,
                    amount: receives,
                }],
                kind: EventKind::Completed,
                payload: serde_json::json!({ "seller_credited": receives }),
            }
        }
        EscrowAction::Dispute { reason } => {
            patch.dispute_at = Some(now);
            patch.dispute_reason = Some(reason.clone());
            Effects {
                patch,
                wallet_ops: vec![],
                kind: EventKind::Disputed,
                payload: serde_json::json!({ "reason": reason }),
            }
        }
        EscrowAction::ResolveRelease => {
            let seller = party(txn.seller_id)?;
            let receives = fixed_seller_receives(txn)?;
            patch.completed_at = Some(now);
            patch.arbiter_id = Some(actor.id);
            Effects {
                patch,
                wallet_ops: vec![WalletOp::Credit {
                    user: seller,
                    amount: receives,
                }],
                kind: EventKind::ResolvedRelease,
                payload: serde_json::json!({ "seller_credited": receives }),
            }
        }
        EscrowAction::ResolveRefund => {
            let buyer = party(txn.buyer_id)?;
            // Refund the buyer's full original debit so money is conserved
            // for every fee bearer, not only the seller-pays default.
            let refund = txn.buyer_debit();
            patch.arbiter_id = Some(actor.id);
            Effects {
                patch,
                wallet_ops: vec![WalletOp::Credit {
                    user: buyer,
                    amount: refund,
                }],
                kind: EventKind::ResolvedRefund,
                payload: serde_json::json!({ "buyer_refunded": refund }),
            }
        }
        EscrowAction::Cancel => Effects {
            patch,
            wallet_ops: vec![],
            kind: EventKind::Cancelled,
            payload: serde_json::Value::Null,
        },
    };

    Ok(effects)
}

fn party(id: Option<UserId>) -> Result<UserId, EscrowError> {
    id.ok_or_else(|| EscrowError::Validation("counterpart has not joined yet".into()))
}

/// `seller_receives` is fixed at funding time; a funded record without it is
/// corrupt, not a business error.
fn fixed_seller_receives(txn: &Transaction) -> Result<Decimal, EscrowError> {
    txn.seller_receives.ok_or_else(|| {
        EscrowError::Database(format!(
            "transaction {} funded without seller_receives",
            txn.id
        ))
    })
}
