//! Transaction Ledger storage boundary.
//!
//! The store owns both escrow records and wallet balances so that a status
//! transition and its paired wallet mutation commit as one atomic unit. All
//! status updates use CAS semantics: the write only succeeds if the stored
//! status still equals what the caller observed.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::model::{PartySide, ProductDetails, Transaction, TransitionPatch};
use super::status::TradeStatus;
use crate::core_types::{TransactionId, UserId};
use crate::error::EscrowError;

/// A wallet balance mutation applied inside a transition's atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletOp {
    Debit { user: UserId, amount: Decimal },
    Credit { user: UserId, amount: Decimal },
}

/// Durable storage for escrow transactions and wallet balances.
///
/// `apply_transition` is the only way a status changes after creation:
/// it must verify `expected` against the stored status (CAS), apply the
/// patch and every wallet op in one atomic unit, and leave the record
/// completely unchanged on any failure.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn create(&self, txn: &Transaction) -> Result<(), EscrowError>;

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, EscrowError>;

    async fn get_by_code(&self, code: &str) -> Result<Option<Transaction>, EscrowError>;

    /// All transactions where the user is buyer or seller, newest first.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<Transaction>, EscrowError>;

    /// CAS update: apply `patch` and `wallet_ops` atomically iff the stored
    /// status equals `expected`. Returns the updated record.
    async fn apply_transition(
        &self,
        id: TransactionId,
        expected: TradeStatus,
        patch: &TransitionPatch,
        wallet_ops: &[WalletOp],
    ) -> Result<Transaction, EscrowError>;

    /// Counterpart joins a pending room, filling the open side. A joining
    /// seller may supply the product details.
    async fn join(
        &self,
        id: TransactionId,
        side: PartySide,
        user: UserId,
        details: Option<ProductDetails>,
    ) -> Result<Transaction, EscrowError>;

    /// Replace descriptive metadata; only while pending and un-joined.
    async fn update_details(
        &self,
        id: TransactionId,
        details: ProductDetails,
    ) -> Result<Transaction, EscrowError>;

    /// Record a party's advisory acknowledgement flag.
    async fn set_confirmed(
        &self,
        id: TransactionId,
        side: PartySide,
    ) -> Result<Transaction, EscrowError>;

    // === Wallet ledger ===

    async fn balance(&self, user: UserId) -> Result<Decimal, EscrowError>;

    async fn credit_wallet(&self, user: UserId, amount: Decimal) -> Result<(), EscrowError>;

    /// Debit outside a transition (withdrawals). Fails with
    /// `InsufficientFunds` rather than going negative.
    async fn debit_wallet(&self, user: UserId, amount: Decimal) -> Result<(), EscrowError>;
}

pub use memory::MemoryStore;

mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Inner {
        txns: HashMap<TransactionId, Transaction>,
        codes: HashMap<String, TransactionId>,
        balances: HashMap<UserId, Decimal>,
    }

    /// Mutex-guarded in-process store.
    ///
    /// Used by tests and by the binary when no `postgres_url` is configured.
    /// The single lock gives the same atomicity guarantees as the Postgres
    /// store's per-transition DB transaction.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Inner {
        fn apply_wallet_ops(&mut self, ops: &[WalletOp]) -> Result<(), EscrowError> {
            // Dry-run debits first so a failure leaves every balance untouched
            for op in ops {
                if let WalletOp::Debit { user, amount } = op {
                    let balance = self.balances.get(user).copied().unwrap_or(Decimal::ZERO);
                    if balance < *amount {
                        return Err(EscrowError::InsufficientFunds);
                    }
                }
            }
            for op in ops {
                match op {
                    WalletOp::Debit { user, amount } => {
                        *self.balances.entry(*user).or_insert(Decimal::ZERO) -= *amount;
                    }
                    WalletOp::Credit { user, amount } => {
                        *self.balances.entry(*user).or_insert(Decimal::ZERO) += *amount;
                    }
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EscrowStore for MemoryStore {
        async fn create(&self, txn: &Transaction) -> Result<(), EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.codes.contains_key(&txn.code) {
                return Err(EscrowError::Validation(format!(
                    "reference code {} already exists",
                    txn.code
                )));
            }
            inner.codes.insert(txn.code.clone(), txn.id);
            inner.txns.insert(txn.id, txn.clone());
            Ok(())
        }

        async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, EscrowError> {
            Ok(self.inner.lock().unwrap().txns.get(&id).cloned())
        }

        async fn get_by_code(&self, code: &str) -> Result<Option<Transaction>, EscrowError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .codes
                .get(code)
                .and_then(|id| inner.txns.get(id))
                .cloned())
        }

        async fn list_for_user(&self, user: UserId) -> Result<Vec<Transaction>, EscrowError> {
            let inner = self.inner.lock().unwrap();
            let mut out: Vec<Transaction> = inner
                .txns
                .values()
                .filter(|t| t.is_party(user))
                .cloned()
                .collect();
            out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(out)
        }

        async fn apply_transition(
            &self,
            id: TransactionId,
            expected: TradeStatus,
            patch: &TransitionPatch,
            wallet_ops: &[WalletOp],
        ) -> Result<Transaction, EscrowError> {
            let mut inner = self.inner.lock().unwrap();

            let current = inner
                .txns
                .get(&id)
                .ok_or_else(|| EscrowError::NotFound(id.to_string()))?
                .status;
            if current != expected {
                return Err(EscrowError::Conflict { expected });
            }

            // Wallet ops first: a debit failure must not leave a half-applied
            // transition (the dry-run inside makes this all-or-nothing)
            inner.apply_wallet_ops(wallet_ops)?;

            let txn = inner.txns.get_mut(&id).unwrap();
            patch.apply(txn);
            Ok(txn.clone())
        }

        async fn join(
            &self,
            id: TransactionId,
            side: PartySide,
            user: UserId,
            details: Option<ProductDetails>,
        ) -> Result<Transaction, EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            let txn = inner
                .txns
                .get_mut(&id)
                .ok_or_else(|| EscrowError::NotFound(id.to_string()))?;

            if txn.status != TradeStatus::Pending {
                return Err(EscrowError::Conflict {
                    expected: TradeStatus::Pending,
                });
            }
            if txn.is_party(user) {
                return Err(EscrowError::Validation(
                    "cannot occupy both sides of a trade".into(),
                ));
            }
            let slot = match side {
                PartySide::Buyer => &mut txn.buyer_id,
                PartySide::Seller => &mut txn.seller_id,
            };
            if slot.is_some() {
                return Err(EscrowError::Validation("side already taken".into()));
            }
            *slot = Some(user);

            if side == PartySide::Seller {
                if let Some(details) = details {
                    txn.product_name = details.product_name;
                    txn.description = details.description;
                    txn.category = details.category;
                    txn.images = details.images;
                }
            }
            Ok(txn.clone())
        }

        async fn update_details(
            &self,
            id: TransactionId,
            details: ProductDetails,
        ) -> Result<Transaction, EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            let txn = inner
                .txns
                .get_mut(&id)
                .ok_or_else(|| EscrowError::NotFound(id.to_string()))?;

            if txn.status != TradeStatus::Pending {
                return Err(EscrowError::Conflict {
                    expected: TradeStatus::Pending,
                });
            }
            if txn.both_parties_present() {
                return Err(EscrowError::Validation(
                    "details are frozen once the counterpart joined".into(),
                ));
            }
            txn.product_name = details.product_name;
            txn.description = details.description;
            txn.category = details.category;
            txn.images = details.images;
            Ok(txn.clone())
        }

        async fn set_confirmed(
            &self,
            id: TransactionId,
            side: PartySide,
        ) -> Result<Transaction, EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            let txn = inner
                .txns
                .get_mut(&id)
                .ok_or_else(|| EscrowError::NotFound(id.to_string()))?;
            match side {
                PartySide::Buyer => txn.buyer_confirmed = true,
                PartySide::Seller => txn.seller_confirmed = true,
            }
            Ok(txn.clone())
        }

        async fn balance(&self, user: UserId) -> Result<Decimal, EscrowError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .balances
                .get(&user)
                .copied()
                .unwrap_or(Decimal::ZERO))
        }

        async fn credit_wallet(&self, user: UserId, amount: Decimal) -> Result<(), EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            *inner.balances.entry(user).or_insert(Decimal::ZERO) += amount;
            Ok(())
        }

        async fn debit_wallet(&self, user: UserId, amount: Decimal) -> Result<(), EscrowError> {
            let mut inner = self.inner.lock().unwrap();
            inner.apply_wallet_ops(&[WalletOp::Debit { user, amount }])
        }
    }
}
