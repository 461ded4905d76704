//! Postgres-backed `FundingStore`.
//!
//! Shares the wallet ledger table with the escrow store; settle and
//! withdrawal apply run in one database transaction each.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::PgConnection;

use super::store::FundingStore;
use super::types::{IntentStatus, TopUpIntent, WithdrawStatus, Withdrawal};
use crate::core_types::UserId;
use crate::error::EscrowError;
use crate::escrow::db::apply_wallet_op;
use crate::escrow::WalletOp;

pub const FUNDING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS topup_intents (
    id           CHAR(26) PRIMARY KEY,
    user_id      BIGINT NOT NULL,
    reference    VARCHAR(16) NOT NULL UNIQUE,
    amount       NUMERIC(30, 10) NOT NULL CHECK (amount > 0),
    status       SMALLINT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    credited_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS withdrawals (
    id           CHAR(26) PRIMARY KEY,
    user_id      BIGINT NOT NULL,
    amount       NUMERIC(30, 10) NOT NULL CHECK (amount > 0),
    status       SMALLINT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    resolved_at  TIMESTAMPTZ,
    resolved_by  BIGINT
);
CREATE INDEX IF NOT EXISTS idx_withdrawals_user ON withdrawals (user_id, created_at DESC);
"#;

pub struct PgFunding {
    pool: PgPool,
}

impl PgFunding {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), EscrowError> {
        sqlx::raw_sql(FUNDING_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct IntentRow {
    id: String,
    user_id: i64,
    reference: String,
    amount: Decimal,
    status: i16,
    created_at: DateTime<Utc>,
    credited_at: Option<DateTime<Utc>>,
}

impl IntentRow {
    fn into_intent(self) -> Result<TopUpIntent, EscrowError> {
        let status = IntentStatus::from_id(self.status)
            .ok_or_else(|| EscrowError::Database(format!("unknown intent status {}", self.status)))?;
        Ok(TopUpIntent {
            id: self.id,
            user_id: self.user_id as UserId,
            reference: self.reference,
            amount: self.amount,
            status,
            created_at: self.created_at,
            credited_at: self.credited_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    id: String,
    user_id: i64,
    amount: Decimal,
    status: i16,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<i64>,
}

impl WithdrawalRow {
    fn into_withdrawal(self) -> Result<Withdrawal, EscrowError> {
        let status = WithdrawStatus::from_id(self.status).ok_or_else(|| {
            EscrowError::Database(format!("unknown withdrawal status {}", self.status))
        })?;
        Ok(Withdrawal {
            id: self.id,
            user_id: self.user_id as UserId,
            amount: self.amount,
            status,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            resolved_by: self.resolved_by.map(|v| v as UserId),
        })
    }
}

/// Substring match of open references against unstructured provider content,
/// done in SQL: a row matches when the content contains its reference.
async fn find_by_content(
    conn: &mut PgConnection,
    content: &str,
    status: IntentStatus,
) -> Result<Option<TopUpIntent>, EscrowError> {
    sqlx::query_as::<_, IntentRow>(
        "SELECT id, user_id, reference, amount, status, created_at, credited_at \
         FROM topup_intents \
         WHERE status = $1 AND POSITION(reference IN $2) > 0 \
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(status.id())
    .bind(content)
    .fetch_optional(conn)
    .await?
    .map(IntentRow::into_intent)
    .transpose()
}

#[async_trait]
impl FundingStore for PgFunding {
    async fn create_intent(&self, intent: &TopUpIntent) -> Result<(), EscrowError> {
        sqlx::query(
            "INSERT INTO topup_intents (id, user_id, reference, amount, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&intent.id)
        .bind(intent.user_id as i64)
        .bind(&intent.reference)
        .bind(intent.amount)
        .bind(intent.status.id())
        .bind(intent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_pending_by_content(
        &self,
        content: &str,
    ) -> Result<Option<TopUpIntent>, EscrowError> {
        let mut conn = self.pool.acquire().await?;
        find_by_content(&mut conn, content, IntentStatus::Pending).await
    }

    async fn find_credited_by_content(
        &self,
        content: &str,
    ) -> Result<Option<TopUpIntent>, EscrowError> {
        let mut conn = self.pool.acquire().await?;
        find_by_content(&mut conn, content, IntentStatus::Credited).await
    }

    async fn settle_intent(&self, reference: &str) -> Result<TopUpIntent, EscrowError> {
        let mut tx = self.pool.begin().await?;

        // CAS on PENDING: a replayed webhook loses here
        let row = sqlx::query_as::<_, IntentRow>(
            "UPDATE topup_intents SET status = $2, credited_at = $3 \
             WHERE reference = $1 AND status = $4 \
             RETURNING id, user_id, reference, amount, status, created_at, credited_at",
        )
        .bind(reference)
        .bind(IntentStatus::Credited.id())
        .bind(Utc::now())
        .bind(IntentStatus::Pending.id())
        .fetch_optional(&mut *tx)
        .await?;

        let intent = match row {
            Some(row) => row.into_intent()?,
            None => {
                let exists =
                    sqlx::query("SELECT 1 FROM topup_intents WHERE reference = $1")
                        .bind(reference)
                        .fetch_optional(&mut *tx)
                        .await?
                        .is_some();
                return Err(if exists {
                    EscrowError::AlreadyProcessed
                } else {
                    EscrowError::NotFound(reference.to_string())
                });
            }
        };

        apply_wallet_op(
            &mut tx,
            &WalletOp::Credit {
                user: intent.user_id,
                amount: intent.amount,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(intent)
    }

    async fn apply_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), EscrowError> {
        let mut tx = self.pool.begin().await?;

        apply_wallet_op(
            &mut tx,
            &WalletOp::Debit {
                user: withdrawal.user_id,
                amount: withdrawal.amount,
            },
        )
        .await?;

        sqlx::query(
            "INSERT INTO withdrawals (id, user_id, amount, status, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&withdrawal.id)
        .bind(withdrawal.user_id as i64)
        .bind(withdrawal.amount)
        .bind(withdrawal.status.id())
        .bind(withdrawal.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, EscrowError> {
        sqlx::query_as::<_, WithdrawalRow>(
            "SELECT id, user_id, amount, status, created_at, resolved_at, resolved_by \
             FROM withdrawals WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(WithdrawalRow::into_withdrawal)
        .transpose()
    }

    async fn resolve_withdrawal(
        &self,
        id: &str,
        approve: bool,
        staff: UserId,
    ) -> Result<Withdrawal, EscrowError> {
        let mut tx = self.pool.begin().await?;

        let target = if approve {
            WithdrawStatus::Success
        } else {
            WithdrawStatus::Rejected
        };
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "UPDATE withdrawals SET status = $2, resolved_at = $3, resolved_by = $4 \
             WHERE id = $1 AND status = $5 \
             RETURNING id, user_id, amount, status, created_at, resolved_at, resolved_by",
        )
        .bind(id)
        .bind(target.id())
        .bind(Utc::now())
        .bind(staff as i64)
        .bind(WithdrawStatus::Processing.id())
        .fetch_optional(&mut *tx)
        .await?;

        let withdrawal = match row {
            Some(row) => row.into_withdrawal()?,
            None => {
                let exists = sqlx::query("SELECT 1 FROM withdrawals WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .is_some();
                return Err(if exists {
                    EscrowError::AlreadyProcessed
                } else {
                    EscrowError::NotFound(id.to_string())
                });
            }
        };

        if withdrawal.status == WithdrawStatus::Rejected {
            apply_wallet_op(
                &mut tx,
                &WalletOp::Credit {
                    user: withdrawal.user_id,
                    amount: withdrawal.amount,
                },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn list_withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, EscrowError> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT id, user_id, amount, status, created_at, resolved_at, resolved_by \
             FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(WithdrawalRow::into_withdrawal)
            .collect()
    }
}
