//! Escrow Transaction record and fee math.
//!
//! The record is the canonical ledger row. Fee rate is snapshotted at
//! creation; `fee_amount` and `seller_receives` are computed once at funding
//! time and never recomputed after that.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::status::TradeStatus;
use crate::core_types::{TransactionId, UserId};
use crate::error::EscrowError;

/// Which party's proceeds absorb the platform fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum FeeBearer {
    Buyer = 1,
    Seller = 2,
    Split = 3,
}

impl FeeBearer {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(FeeBearer::Buyer),
            2 => Some(FeeBearer::Seller),
            3 => Some(FeeBearer::Split),
            _ => None,
        }
    }

    /// Portion of the fee paid on top of the escrowed amount by the buyer.
    pub fn buyer_share(&self, fee: Decimal) -> Decimal {
        match self {
            FeeBearer::Buyer => fee,
            FeeBearer::Seller => Decimal::ZERO,
            FeeBearer::Split => fee / Decimal::TWO,
        }
    }

    /// Portion of the fee deducted from the seller's proceeds.
    pub fn seller_share(&self, fee: Decimal) -> Decimal {
        fee - self.buyer_share(fee)
    }
}

/// Which side of the trade a participant occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartySide {
    Buyer,
    Seller,
}

/// Platform fee for an escrowed amount at the snapshotted rate.
#[inline]
pub fn fee_for(amount: Decimal, fee_percent: Decimal) -> Decimal {
    amount * fee_percent / Decimal::ONE_HUNDRED
}

/// Canonical escrow transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Short human-readable reference, unique, assigned at creation.
    pub code: String,
    pub buyer_id: Option<UserId>,
    pub seller_id: Option<UserId>,
    pub moderator_id: Option<UserId>,
    pub arbiter_id: Option<UserId>,

    pub product_name: String,
    pub description: String,
    pub category: String,
    pub images: Vec<String>,

    /// Escrowed principal, always > 0.
    pub amount: Decimal,
    /// Fee rate snapshotted at creation, in percent [0, 100].
    pub fee_percent: Decimal,
    /// Set once at funding time.
    pub fee_amount: Option<Decimal>,
    pub fee_bearer: FeeBearer,
    /// Set once at funding time; in [0, amount].
    pub seller_receives: Option<Decimal>,

    pub dispute_window_hours: i64,
    pub status: TradeStatus,
    pub dispute_reason: Option<String>,

    /// Advisory acknowledgement flags; recorded but never gate a transition.
    pub buyer_confirmed: bool,
    pub seller_confirmed: bool,

    pub created_at: DateTime<Utc>,
    pub deposited_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dispute_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Total the buyer is debited at funding time.
    ///
    /// Only meaningful once `fee_amount` is fixed; before funding the fee is
    /// not yet snapshotted into an amount.
    pub fn buyer_debit(&self) -> Decimal {
        let fee = self.fee_amount.unwrap_or_else(|| fee_for(self.amount, self.fee_percent));
        self.amount + self.fee_bearer.buyer_share(fee)
    }

    /// Both parties present (a counterpart has joined the room).
    #[inline]
    pub fn both_parties_present(&self) -> bool {
        self.buyer_id.is_some() && self.seller_id.is_some()
    }

    pub fn is_buyer(&self, user: UserId) -> bool {
        self.buyer_id == Some(user)
    }

    pub fn is_seller(&self, user: UserId) -> bool {
        self.seller_id == Some(user)
    }

    pub fn is_party(&self, user: UserId) -> bool {
        self.is_buyer(user) || self.is_seller(user)
    }
}

/// Descriptive metadata supplied at creation or by a joining seller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductDetails {
    pub product_name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Input for creating a new escrow transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub creator: UserId,
    pub creator_side: PartySide,
    #[serde(flatten)]
    pub details: ProductDetails,
    pub amount: Decimal,
    pub fee_percent: Decimal,
    pub fee_bearer: FeeBearer,
    pub dispute_window_hours: i64,
}

impl NewTransaction {
    /// Validate the input and build a fresh `Pending` record.
    ///
    /// Rejected before any persistence: non-positive amount, out-of-range fee
    /// rate, negative dispute window.
    pub fn build(self) -> Result<Transaction, EscrowError> {
        if self.amount <= Decimal::ZERO {
            return Err(EscrowError::Validation("amount must be positive".into()));
        }
        if self.fee_percent < Decimal::ZERO || self.fee_percent > Decimal::ONE_HUNDRED {
            return Err(EscrowError::Validation(
                "fee_percent must be within [0, 100]".into(),
            ));
        }
        if self.dispute_window_hours < 0 {
            return Err(EscrowError::Validation(
                "dispute_window_hours must not be negative".into(),
            ));
        }

        let (buyer_id, seller_id) = match self.creator_side {
            PartySide::Buyer => (Some(self.creator), None),
            PartySide::Seller => (None, Some(self.creator)),
        };

        Ok(Transaction {
            id: TransactionId::new(),
            code: generate_code(),
            buyer_id,
            seller_id,
            moderator_id: None,
            arbiter_id: None,
            product_name: self.details.product_name,
            description: self.details.description,
            category: self.details.category,
            images: self.details.images,
            amount: self.amount,
            fee_percent: self.fee_percent,
            fee_amount: None,
            fee_bearer: self.fee_bearer,
            seller_receives: None,
            dispute_window_hours: self.dispute_window_hours,
            status: TradeStatus::Pending,
            dispute_reason: None,
            buyer_confirmed: false,
            seller_confirmed: false,
            created_at: Utc::now(),
            deposited_at: None,
            shipped_at: None,
            completed_at: None,
            dispute_at: None,
        })
    }
}

/// Fields written by a successful state transition.
///
/// Timestamps are stamped exactly once: `apply` never overwrites a timestamp
/// that is already set.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub status: Option<TradeStatus>,
    pub fee_amount: Option<Decimal>,
    pub seller_receives: Option<Decimal>,
    pub dispute_reason: Option<String>,
    pub moderator_id: Option<UserId>,
    pub arbiter_id: Option<UserId>,
    pub deposited_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dispute_at: Option<DateTime<Utc>>,
}

impl TransitionPatch {
    pub fn to(status: TradeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Apply the patch to an in-memory record.
    pub fn apply(&self, txn: &mut Transaction) {
        if let Some(status) = self.status {
            txn.status = status;
        }
        if let Some(fee) = self.fee_amount {
            txn.fee_amount = Some(fee);
        }
        if let Some(receives) = self.seller_receives {
            txn.seller_receives = Some(receives);
        }
        if let Some(reason) = &self.dispute_reason {
            txn.dispute_reason = Some(reason.clone());
        }
        if let Some(moderator) = self.moderator_id {
            txn.moderator_id = Some(moderator);
        }
        if let Some(arbiter) = self.arbiter_id {
            txn.arbiter_id = Some(arbiter);
        }
        if txn.deposited_at.is_none() {
            txn.deposited_at = self.deposited_at;
        }
        if txn.shipped_at.is_none() {
            txn.shipped_at = self.shipped_at;
        }
        if txn.completed_at.is_none() {
            txn.completed_at = self.completed_at;
        }
        if txn.dispute_at.is_none() {
            txn.dispute_at = self.dispute_at;
        }
    }
}

/// Generate a short human-readable reference code, e.g. `ESC-7K2FQ9XD`.
///
/// 8 chars from a 32-symbol alphabet gives 40 bits of entropy; uniqueness is
/// still enforced by the store's unique constraint on `code`.
pub fn generate_code() -> String {
    // 0/O and 1/I excluded to keep codes transcription-safe
    const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("ESC-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn new_txn(amount: Decimal, fee_percent: Decimal, bearer: FeeBearer) -> Transaction {
        NewTransaction {
            creator: 100,
            creator_side: PartySide::Buyer,
            details: ProductDetails {
                product_name: "mechanical keyboard".into(),
                description: "as new".into(),
                category: "electronics".into(),
                images: vec![],
            },
            amount,
            fee_percent,
            fee_bearer: bearer,
            dispute_window_hours: 72,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn test_create_sets_pending_and_creator_side() {
        let txn = new_txn(dec("100000"), dec("5"), FeeBearer::Seller);
        assert_eq!(txn.status, TradeStatus::Pending);
        assert_eq!(txn.buyer_id, Some(100));
        assert_eq!(txn.seller_id, None);
        assert!(txn.code.starts_with("ESC-"));
        assert!(txn.deposited_at.is_none());
    }

    #[test]
    fn test_create_rejects_bad_amount_and_fee() {
        let mut input = NewTransaction {
            creator: 1,
            creator_side: PartySide::Seller,
            details: ProductDetails::default(),
            amount: Decimal::ZERO,
            fee_percent: dec("5"),
            fee_bearer: FeeBearer::Seller,
            dispute_window_hours: 24,
        };
        assert!(matches!(
            input.clone().build(),
            Err(EscrowError::Validation(_))
        ));

        input.amount = dec("10");
        input.fee_percent = dec("101");
        assert!(matches!(
            input.clone().build(),
            Err(EscrowError::Validation(_))
        ));

        input.fee_percent = dec("-1");
        assert!(matches!(input.build(), Err(EscrowError::Validation(_))));
    }

    #[test]
    fn test_fee_split_seller_bears() {
        // 100000 at 5% with the seller bearing the whole fee
        let fee = fee_for(dec("100000"), dec("5"));
        assert_eq!(fee, dec("5000"));
        assert_eq!(FeeBearer::Seller.seller_share(fee), dec("5000"));
        assert_eq!(FeeBearer::Seller.buyer_share(fee), Decimal::ZERO);
    }

    #[test]
    fn test_fee_split_buyer_bears() {
        let fee = fee_for(dec("100000"), dec("5"));
        assert_eq!(FeeBearer::Buyer.buyer_share(fee), dec("5000"));
        assert_eq!(FeeBearer::Buyer.seller_share(fee), Decimal::ZERO);

        let mut txn = new_txn(dec("100000"), dec("5"), FeeBearer::Buyer);
        txn.fee_amount = Some(fee);
        assert_eq!(txn.buyer_debit(), dec("105000"));
    }

    #[test]
    fn test_fee_split_halves() {
        let fee = fee_for(dec("100000"), dec("5"));
        let buyer = FeeBearer::Split.buyer_share(fee);
        let seller = FeeBearer::Split.seller_share(fee);
        assert_eq!(buyer + seller, fee);
        assert_eq!(buyer, dec("2500"));
    }

    #[test]
    fn test_patch_stamps_timestamps_once() {
        let mut txn = new_txn(dec("500"), dec("2"), FeeBearer::Seller);
        let first = Utc::now();
        let mut patch = TransitionPatch::to(TradeStatus::Deposited);
        patch.deposited_at = Some(first);
        patch.apply(&mut txn);
        assert_eq!(txn.deposited_at, Some(first));

        // A later patch must not move an already-set timestamp
        let mut again = TransitionPatch::to(TradeStatus::Shipping);
        again.deposited_at = Some(first + chrono::Duration::hours(1));
        again.shipped_at = Some(first + chrono::Duration::hours(2));
        again.apply(&mut txn);
        assert_eq!(txn.deposited_at, Some(first));
        assert_eq!(txn.shipped_at, Some(first + chrono::Duration::hours(2)));
        assert_eq!(txn.status, TradeStatus::Shipping);
    }

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 12);
        assert!(code.starts_with("ESC-"));
        assert!(!code.contains('0') && !code.contains('O'));
    }
}
