//! Funding record types.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::UserId;

/// Lifecycle of a top-up intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum IntentStatus {
    Pending = 0,
    Credited = 1,
}

impl IntentStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(IntentStatus::Pending),
            1 => Some(IntentStatus::Credited),
            _ => None,
        }
    }
}

/// A user's request to add funds, settled by the payment-provider webhook.
///
/// The `reference` is what the user writes in the transfer content; the
/// webhook matches it back to this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpIntent {
    pub id: String,
    pub user_id: UserId,
    pub reference: String,
    pub amount: Decimal,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub credited_at: Option<DateTime<Utc>>,
}

impl TopUpIntent {
    pub fn new(user_id: UserId, amount: Decimal) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id,
            reference: generate_reference(),
            amount,
            status: IntentStatus::Pending,
            created_at: Utc::now(),
            credited_at: None,
        }
    }
}

/// Lifecycle of a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum WithdrawStatus {
    Processing = 0,
    Success = 1,
    Rejected = 2,
}

impl WithdrawStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawStatus::Processing),
            1 => Some(WithdrawStatus::Success),
            2 => Some(WithdrawStatus::Rejected),
            _ => None,
        }
    }
}

/// A withdrawal: the balance is deducted up front; rejection refunds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: WithdrawStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
}

impl Withdrawal {
    pub fn new(user_id: UserId, amount: Decimal) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id,
            amount,
            status: WithdrawStatus::Processing,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }
}

/// Short transfer reference, e.g. `PAY-M3XW7Q2H`, transcription-safe.
pub fn generate_reference() -> String {
    const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("PAY-{}", suffix)
}
