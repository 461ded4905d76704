//! Top-up intents and payment-provider webhook settlement.
//!
//! The provider posts free-text transfer content plus the paid amount. We
//! match a pending intent by its reference inside the content, verify the
//! amount within tolerance, and credit the wallet exactly once; a replayed
//! notification is a no-op.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::store::FundingStore;
use super::types::TopUpIntent;
use crate::core_types::UserId;
use crate::error::EscrowError;

pub struct DepositService {
    store: Arc<dyn FundingStore>,
    /// Absolute tolerance on the paid amount (providers round, fees nibble).
    tolerance: Decimal,
}

impl DepositService {
    pub fn new(store: Arc<dyn FundingStore>, tolerance: Decimal) -> Self {
        Self { store, tolerance }
    }

    pub async fn create_intent(
        &self,
        user: UserId,
        amount: Decimal,
    ) -> Result<TopUpIntent, EscrowError> {
        if amount <= Decimal::ZERO {
            return Err(EscrowError::Validation("amount must be positive".into()));
        }
        let intent = TopUpIntent::new(user, amount);
        self.store.create_intent(&intent).await?;
        info!(
            reference = %intent.reference,
            user = user,
            amount = %amount,
            "top-up intent created"
        );
        Ok(intent)
    }

    /// Settle one provider notification. Returns the credited intent; a
    /// replay returns the already-credited intent unchanged.
    pub async fn handle_payment(
        &self,
        content: &str,
        paid: Decimal,
    ) -> Result<TopUpIntent, EscrowError> {
        let pending = self.store.find_pending_by_content(content).await?;

        let intent = match pending {
            Some(intent) => intent,
            None => {
                // Recognize replays of an already-settled reference
                if let Some(credited) = self.store.find_credited_by_content(content).await? {
                    info!(
                        reference = %credited.reference,
                        "payment replayed for settled reference, ignoring"
                    );
                    return Ok(credited);
                }
                warn!(paid = %paid, "payment with no matching top-up reference");
                return Err(EscrowError::UnmatchedReference);
            }
        };

        let delta = (paid - intent.amount).abs();
        if delta > self.tolerance {
            warn!(
                reference = %intent.reference,
                expected = %intent.amount,
                paid = %paid,
                "payment amount outside tolerance"
            );
            return Err(EscrowError::AmountMismatch {
                expected: intent.amount,
                paid,
            });
        }

        match self.store.settle_intent(&intent.reference).await {
            Ok(settled) => {
                info!(
                    reference = %settled.reference,
                    user = settled.user_id,
                    amount = %settled.amount,
                    "wallet credited from payment"
                );
                Ok(settled)
            }
            // Lost a settle race with a concurrent replay; the money moved
            // exactly once either way
            Err(EscrowError::AlreadyProcessed) => Ok(intent),
            Err(err) => Err(err),
        }
    }
}
