//! Funding storage boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::types::{IntentStatus, TopUpIntent, WithdrawStatus, Withdrawal};
use crate::core_types::UserId;
use crate::error::EscrowError;
use crate::escrow::EscrowStore;

/// Durable storage for top-up intents and withdrawals.
///
/// Wallet credits and debits performed here go through the same wallet ledger
/// the escrow store uses, atomically with the funding record they belong to.
#[async_trait]
pub trait FundingStore: Send + Sync {
    async fn create_intent(&self, intent: &TopUpIntent) -> Result<(), EscrowError>;

    /// First `PENDING` intent whose reference occurs in the free-text
    /// transfer content. Provider content is unstructured, so this is a
    /// substring scan over open references.
    async fn find_pending_by_content(
        &self,
        content: &str,
    ) -> Result<Option<TopUpIntent>, EscrowError>;

    /// Same scan over already-credited intents, used to recognize replays.
    async fn find_credited_by_content(
        &self,
        content: &str,
    ) -> Result<Option<TopUpIntent>, EscrowError>;

    /// Mark the intent credited and credit the wallet, exactly once.
    /// A second settle of the same reference fails with `AlreadyProcessed`.
    async fn settle_intent(&self, reference: &str) -> Result<TopUpIntent, EscrowError>;

    /// Deduct the balance and record a `PROCESSING` withdrawal atomically.
    async fn apply_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), EscrowError>;

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, EscrowError>;

    /// Approve (`SUCCESS`) or reject (refund + `REJECTED`) a processing
    /// withdrawal.
    async fn resolve_withdrawal(
        &self,
        id: &str,
        approve: bool,
        staff: UserId,
    ) -> Result<Withdrawal, EscrowError>;

    /// A user's withdrawals, newest first.
    async fn list_withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, EscrowError>;
}

pub use memory::MemoryFunding;

mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Inner {
        // keyed by reference
        intents: HashMap<String, TopUpIntent>,
        withdrawals: HashMap<String, Withdrawal>,
    }

    /// In-process funding store sharing the escrow store's wallet ledger.
    pub struct MemoryFunding {
        wallet: Arc<dyn EscrowStore>,
        inner: Mutex<Inner>,
    }

    impl MemoryFunding {
        pub fn new(wallet: Arc<dyn EscrowStore>) -> Self {
            Self {
                wallet,
                inner: Mutex::new(Inner::default()),
            }
        }
    }

    fn find_by_content(
        inner: &Inner,
        content: &str,
        status: IntentStatus,
    ) -> Option<TopUpIntent> {
        inner
            .intents
            .values()
            .filter(|i| i.status == status)
            .find(|i| content.contains(&i.reference))
            .cloned()
    }

    #[async_trait]
    impl FundingStore for MemoryFunding {
        async fn create_intent(&self, intent: &TopUpIntent) -> Result<(), EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.intents.contains_key(&intent.reference) {
                return Err(EscrowError::Validation(format!(
                    "reference {} already exists",
                    intent.reference
                )));
            }
            inner
                .intents
                .insert(intent.reference.clone(), intent.clone());
            Ok(())
        }

        async fn find_pending_by_content(
            &self,
            content: &str,
        ) -> Result<Option<TopUpIntent>, EscrowError> {
            let inner = self.inner.lock().unwrap();
            Ok(find_by_content(&inner, content, IntentStatus::Pending))
        }

        async fn find_credited_by_content(
            &self,
            content: &str,
        ) -> Result<Option<TopUpIntent>, EscrowError> {
            let inner = self.inner.lock().unwrap();
            Ok(find_by_content(&inner, content, IntentStatus::Credited))
        }

        async fn settle_intent(&self, reference: &str) -> Result<TopUpIntent, EscrowError> {
            let settled = {
                let mut inner = self.inner.lock().unwrap();
                let intent = inner
                    .intents
                    .get_mut(reference)
                    .ok_or_else(|| EscrowError::NotFound(reference.to_string()))?;
                if intent.status == IntentStatus::Credited {
                    return Err(EscrowError::AlreadyProcessed);
                }
                intent.status = IntentStatus::Credited;
                intent.credited_at = Some(Utc::now());
                intent.clone()
            };
            // Credit cannot fail in the wallet ledger, so crediting after the
            // status flip keeps the flip the serialization point.
            self.wallet
                .credit_wallet(settled.user_id, settled.amount)
                .await?;
            Ok(settled)
        }

        async fn apply_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), EscrowError> {
            // Debit first: it is the only fallible step
            self.wallet
                .debit_wallet(withdrawal.user_id, withdrawal.amount)
                .await?;
            let mut inner = self.inner.lock().unwrap();
            inner
                .withdrawals
                .insert(withdrawal.id.clone(), withdrawal.clone());
            Ok(())
        }

        async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, EscrowError> {
            Ok(self.inner.lock().unwrap().withdrawals.get(id).cloned())
        }

        async fn resolve_withdrawal(
            &self,
            id: &str,
            approve: bool,
            staff: UserId,
        ) -> Result<Withdrawal, EscrowError> {
            let resolved = {
                let mut inner = self.inner.lock().unwrap();
                let withdrawal = inner
                    .withdrawals
                    .get_mut(id)
                    .ok_or_else(|| EscrowError::NotFound(id.to_string()))?;
                if withdrawal.status != WithdrawStatus::Processing {
                    return Err(EscrowError::AlreadyProcessed);
                }
                withdrawal.status = if approve {
                    WithdrawStatus::Success
                } else {
                    WithdrawStatus::Rejected
                };
                withdrawal.resolved_at = Some(Utc::now());
                withdrawal.resolved_by = Some(staff);
                withdrawal.clone()
            };
            if resolved.status == WithdrawStatus::Rejected {
                self.wallet
                    .credit_wallet(resolved.user_id, resolved.amount)
                    .await?;
            }
            Ok(resolved)
        }

        async fn list_withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, EscrowError> {
            let inner = self.inner.lock().unwrap();
            let mut out: Vec<Withdrawal> = inner
                .withdrawals
                .values()
                .filter(|w| w.user_id == user)
                .cloned()
                .collect();
            out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::MemoryStore;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn funding() -> (Arc<MemoryStore>, MemoryFunding) {
        let wallet = Arc::new(MemoryStore::new());
        let funding = MemoryFunding::new(wallet.clone());
        (wallet, funding)
    }

    #[tokio::test]
    async fn test_settle_credits_wallet_once() {
        let (wallet, funding) = funding();
        let intent = TopUpIntent::new(5, dec("250"));
        funding.create_intent(&intent).await.unwrap();

        let settled = funding.settle_intent(&intent.reference).await.unwrap();
        assert_eq!(settled.status, IntentStatus::Credited);
        assert_eq!(wallet.balance(5).await.unwrap(), dec("250"));

        let err = funding.settle_intent(&intent.reference).await.unwrap_err();
        assert!(matches!(err, EscrowError::AlreadyProcessed));
        assert_eq!(wallet.balance(5).await.unwrap(), dec("250"));
    }

    #[tokio::test]
    async fn test_content_match_scoped_to_pending() {
        let (_, funding) = funding();
        let intent = TopUpIntent::new(5, dec("100"));
        funding.create_intent(&intent).await.unwrap();

        let content = format!("bank transfer {} thanks", intent.reference);
        let found = funding
            .find_pending_by_content(&content)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, intent.id);

        funding.settle_intent(&intent.reference).await.unwrap();
        assert!(
            funding
                .find_pending_by_content(&content)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            funding
                .find_credited_by_content(&content)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_withdrawal_deduct_and_refund() {
        let (wallet, funding) = funding();
        wallet.credit_wallet(9, dec("100")).await.unwrap();

        let withdrawal = Withdrawal::new(9, dec("60"));
        funding.apply_withdrawal(&withdrawal).await.unwrap();
        assert_eq!(wallet.balance(9).await.unwrap(), dec("40"));

        // Over-withdrawing the remainder fails and deducts nothing
        let too_much = Withdrawal::new(9, dec("50"));
        assert!(funding.apply_withdrawal(&too_much).await.is_err());
        assert_eq!(wallet.balance(9).await.unwrap(), dec("40"));

        let rejected = funding
            .resolve_withdrawal(&withdrawal.id, false, 99)
            .await
            .unwrap();
        assert_eq!(rejected.status, WithdrawStatus::Rejected);
        assert_eq!(rejected.resolved_by, Some(99));
        assert_eq!(wallet.balance(9).await.unwrap(), dec("100"));

        // Resolution is final
        let err = funding
            .resolve_withdrawal(&withdrawal.id, true, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::AlreadyProcessed));
    }
}
