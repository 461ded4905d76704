//! Withdrawal requests.
//!
//! The balance leaves the wallet the moment the request is accepted, so a
//! user cannot spend funds that are on their way out. Staff then approve or
//! reject; rejection puts the money back.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use super::store::FundingStore;
use super::types::Withdrawal;
use crate::core_types::UserId;
use crate::error::EscrowError;
use crate::escrow::Actor;

pub struct WithdrawService {
    store: Arc<dyn FundingStore>,
}

impl WithdrawService {
    pub fn new(store: Arc<dyn FundingStore>) -> Self {
        Self { store }
    }

    pub async fn apply(&self, user: UserId, amount: Decimal) -> Result<Withdrawal, EscrowError> {
        if amount <= Decimal::ZERO {
            return Err(EscrowError::Validation("amount must be positive".into()));
        }
        let withdrawal = Withdrawal::new(user, amount);
        self.store.apply_withdrawal(&withdrawal).await?;
        info!(
            withdrawal_id = %withdrawal.id,
            user = user,
            amount = %amount,
            "withdrawal applied, balance deducted"
        );
        Ok(withdrawal)
    }

    pub async fn resolve(
        &self,
        staff: &Actor,
        id: &str,
        approve: bool,
    ) -> Result<Withdrawal, EscrowError> {
        if !staff.is_staff() {
            return Err(EscrowError::Validation(
                "withdrawal resolution is a staff operation".into(),
            ));
        }
        let resolved = self.store.resolve_withdrawal(id, approve, staff.id).await?;
        info!(
            withdrawal_id = %resolved.id,
            approved = approve,
            staff = staff.id,
            "withdrawal resolved"
        );
        Ok(resolved)
    }

    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>, EscrowError> {
        self.store.list_withdrawals(user).await
    }
}
