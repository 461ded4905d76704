//! Postgres-backed `EscrowStore`.
//!
//! Every transition runs in a single database transaction: the escrow row is
//! locked with `FOR UPDATE`, the status is CAS-checked, wallet rows are
//! mutated with balance guards, and the patch lands in one `UPDATE`. Nothing
//! is visible until commit.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{PgConnection, Row};

use super::model::{FeeBearer, PartySide, ProductDetails, Transaction, TransitionPatch};
use super::status::TradeStatus;
use super::store::{EscrowStore, WalletOp};
use crate::core_types::{TransactionId, UserId};
use crate::error::EscrowError;

pub const ESCROW_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS escrow_transactions (
    id                   CHAR(26) PRIMARY KEY,
    code                 VARCHAR(16) NOT NULL UNIQUE,
    buyer_id             BIGINT,
    seller_id            BIGINT,
    moderator_id         BIGINT,
    arbiter_id           BIGINT,
    product_name         TEXT NOT NULL DEFAULT '',
    description          TEXT NOT NULL DEFAULT '',
    category             TEXT NOT NULL DEFAULT '',
    images               TEXT[] NOT NULL DEFAULT '{}',
    amount               NUMERIC(30, 10) NOT NULL CHECK (amount > 0),
    fee_percent          NUMERIC(10, 4) NOT NULL,
    fee_amount           NUMERIC(30, 10),
    fee_bearer           SMALLINT NOT NULL,
    seller_receives      NUMERIC(30, 10),
    dispute_window_hours BIGINT NOT NULL,
    status               SMALLINT NOT NULL,
    dispute_reason       TEXT,
    buyer_confirmed      BOOLEAN NOT NULL DEFAULT FALSE,
    seller_confirmed     BOOLEAN NOT NULL DEFAULT FALSE,
    created_at           TIMESTAMPTZ NOT NULL,
    deposited_at         TIMESTAMPTZ,
    shipped_at           TIMESTAMPTZ,
    completed_at         TIMESTAMPTZ,
    dispute_at           TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_escrow_buyer ON escrow_transactions (buyer_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_escrow_seller ON escrow_transactions (seller_id, created_at DESC);

CREATE TABLE IF NOT EXISTS wallet_accounts (
    user_id  BIGINT PRIMARY KEY,
    balance  NUMERIC(30, 10) NOT NULL DEFAULT 0 CHECK (balance >= 0)
);
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), EscrowError> {
        sqlx::raw_sql(ESCROW_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TxnRow {
    id: String,
    code: String,
    buyer_id: Option<i64>,
    seller_id: Option<i64>,
    moderator_id: Option<i64>,
    arbiter_id: Option<i64>,
    product_name: String,
    description: String,
    category: String,
    images: Vec<String>,
    amount: Decimal,
    fee_percent: Decimal,
    fee_amount: Option<Decimal>,
    fee_bearer: i16,
    seller_receives: Option<Decimal>,
    dispute_window_hours: i64,
    status: i16,
    dispute_reason: Option<String>,
    buyer_confirmed: bool,
    seller_confirmed: bool,
    created_at: DateTime<Utc>,
    deposited_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    dispute_at: Option<DateTime<Utc>>,
}

impl TxnRow {
    fn into_transaction(self) -> Result<Transaction, EscrowError> {
        let status = TradeStatus::from_id(self.status)
            .ok_or_else(|| EscrowError::Database(format!("unknown status id {}", self.status)))?;
        let fee_bearer = FeeBearer::from_id(self.fee_bearer).ok_or_else(|| {
            EscrowError::Database(format!("unknown fee bearer id {}", self.fee_bearer))
        })?;
        let id = TransactionId::from_str(&self.id)
            .map_err(|_| EscrowError::Database(format!("malformed transaction id {}", self.id)))?;

        Ok(Transaction {
            id,
            code: self.code,
            buyer_id: self.buyer_id.map(|v| v as UserId),
            seller_id: self.seller_id.map(|v| v as UserId),
            moderator_id: self.moderator_id.map(|v| v as UserId),
            arbiter_id: self.arbiter_id.map(|v| v as UserId),
            product_name: self.product_name,
            description: self.description,
            category: self.category,
            images: self.images,
            amount: self.amount,
            fee_percent: self.fee_percent,
            fee_amount: self.fee_amount,
            fee_bearer,
            seller_receives: self.seller_receives,
            dispute_window_hours: self.dispute_window_hours,
            status,
            dispute_reason: self.dispute_reason,
            buyer_confirmed: self.buyer_confirmed,
            seller_confirmed: self.seller_confirmed,
            created_at: self.created_at,
            deposited_at: self.deposited_at,
            shipped_at: self.shipped_at,
            completed_at: self.completed_at,
            dispute_at: self.dispute_at,
        })
    }
}

const SELECT_COLS: &str = "id, code, buyer_id, seller_id, moderator_id, arbiter_id, \
     product_name, description, category, images, amount, fee_percent, fee_amount, \
     fee_bearer, seller_receives, dispute_window_hours, status, dispute_reason, \
     buyer_confirmed, seller_confirmed, created_at, deposited_at, shipped_at, \
     completed_at, dispute_at";

/// Lock the row for the duration of the enclosing transaction.
async fn lock_row(
    conn: &mut PgConnection,
    id: TransactionId,
) -> Result<TxnRow, EscrowError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM escrow_transactions WHERE id = $1 FOR UPDATE"
    );
    sqlx::query_as::<_, TxnRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| EscrowError::NotFound(id.to_string()))
}

pub(crate) async fn apply_wallet_op(
    conn: &mut PgConnection,
    op: &WalletOp,
) -> Result<(), EscrowError> {
    match op {
        WalletOp::Debit { user, amount } => {
            let res = sqlx::query(
                "UPDATE wallet_accounts SET balance = balance - $2 \
                 WHERE user_id = $1 AND balance >= $2",
            )
            .bind(*user as i64)
            .bind(amount)
            .execute(conn)
            .await?;
            if res.rows_affected() != 1 {
                return Err(EscrowError::InsufficientFunds);
            }
            Ok(())
        }
        WalletOp::Credit { user, amount } => {
            sqlx::query(
                "INSERT INTO wallet_accounts (user_id, balance) VALUES ($1, $2) \
                 ON CONFLICT (user_id) DO UPDATE SET balance = wallet_accounts.balance + $2",
            )
            .bind(*user as i64)
            .bind(amount)
            .execute(conn)
            .await?;
            Ok(())
        }
    }
}

async fn write_details(
    conn: &mut PgConnection,
    id: TransactionId,
    details: &ProductDetails,
) -> Result<(), EscrowError> {
    sqlx::query(
        "UPDATE escrow_transactions \
         SET product_name = $2, description = $3, category = $4, images = $5 \
         WHERE id = $1",
    )
    .bind(id.to_string())
    .bind(&details.product_name)
    .bind(&details.description)
    .bind(&details.category)
    .bind(&details.images)
    .execute(conn)
    .await?;
    Ok(())
}

async fn fetch_one(
    conn: &mut PgConnection,
    id: TransactionId,
) -> Result<Transaction, EscrowError> {
    let sql = format!("SELECT {SELECT_COLS} FROM escrow_transactions WHERE id = $1");
    sqlx::query_as::<_, TxnRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| EscrowError::NotFound(id.to_string()))?
        .into_transaction()
}

#[async_trait]
impl EscrowStore for PgStore {
    async fn create(&self, txn: &Transaction) -> Result<(), EscrowError> {
        sqlx::query(
            "INSERT INTO escrow_transactions \
             (id, code, buyer_id, seller_id, moderator_id, arbiter_id, \
              product_name, description, category, images, amount, fee_percent, \
              fee_amount, fee_bearer, seller_receives, dispute_window_hours, status, \
              dispute_reason, buyer_confirmed, seller_confirmed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
                     $15, $16, $17, $18, $19, $20, $21)",
        )
        .bind(txn.id.to_string())
        .bind(&txn.code)
        .bind(txn.buyer_id.map(|v| v as i64))
        .bind(txn.seller_id.map(|v| v as i64))
        .bind(txn.moderator_id.map(|v| v as i64))
        .bind(txn.arbiter_id.map(|v| v as i64))
        .bind(&txn.product_name)
        .bind(&txn.description)
        .bind(&txn.category)
        .bind(&txn.images)
        .bind(txn.amount)
        .bind(txn.fee_percent)
        .bind(txn.fee_amount)
        .bind(txn.fee_bearer.id())
        .bind(txn.seller_receives)
        .bind(txn.dispute_window_hours)
        .bind(txn.status.id())
        .bind(&txn.dispute_reason)
        .bind(txn.buyer_confirmed)
        .bind(txn.seller_confirmed)
        .bind(txn.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, EscrowError> {
        let sql = format!("SELECT {SELECT_COLS} FROM escrow_transactions WHERE id = $1");
        sqlx::query_as::<_, TxnRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(TxnRow::into_transaction)
            .transpose()
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Transaction>, EscrowError> {
        let sql = format!("SELECT {SELECT_COLS} FROM escrow_transactions WHERE code = $1");
        sqlx::query_as::<_, TxnRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(TxnRow::into_transaction)
            .transpose()
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Transaction>, EscrowError> {
        let sql = format!(
            "SELECT {SELECT_COLS} FROM escrow_transactions \
             WHERE buyer_id = $1 OR seller_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, TxnRow>(&sql)
            .bind(user as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TxnRow::into_transaction).collect()
    }

    async fn apply_transition(
        &self,
        id: TransactionId,
        expected: TradeStatus,
        patch: &TransitionPatch,
        wallet_ops: &[WalletOp],
    ) -> Result<Transaction, EscrowError> {
        let mut tx = self.pool.begin().await?;

        let row = lock_row(&mut tx, id).await?;
        if row.status != expected.id() {
            return Err(EscrowError::Conflict { expected });
        }

        for op in wallet_ops {
            apply_wallet_op(&mut tx, op).await?;
        }

        // Timestamps keep their first value; the other fields take the patch
        sqlx::query(
            "UPDATE escrow_transactions SET \
                 status = COALESCE($2, status), \
                 fee_amount = COALESCE($3, fee_amount), \
                 seller_receives = COALESCE($4, seller_receives), \
                 dispute_reason = COALESCE($5, dispute_reason), \
                 moderator_id = COALESCE($6, moderator_id), \
                 arbiter_id = COALESCE($7, arbiter_id), \
                 deposited_at = COALESCE(deposited_at, $8), \
                 shipped_at = COALESCE(shipped_at, $9), \
                 completed_at = COALESCE(completed_at, $10), \
                 dispute_at = COALESCE(dispute_at, $11) \
             WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(patch.status.map(|s| s.id()))
        .bind(patch.fee_amount)
        .bind(patch.seller_receives)
        .bind(&patch.dispute_reason)
        .bind(patch.moderator_id.map(|v| v as i64))
        .bind(patch.arbiter_id.map(|v| v as i64))
        .bind(patch.deposited_at)
        .bind(patch.shipped_at)
        .bind(patch.completed_at)
        .bind(patch.dispute_at)
        .execute(&mut *tx)
        .await?;

        let updated = fetch_one(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn join(
        &self,
        id: TransactionId,
        side: PartySide,
        user: UserId,
        details: Option<ProductDetails>,
    ) -> Result<Transaction, EscrowError> {
        let mut tx = self.pool.begin().await?;
        let row = lock_row(&mut tx, id).await?;

        if row.status != TradeStatus::Pending.id() {
            return Err(EscrowError::Conflict {
                expected: TradeStatus::Pending,
            });
        }
        if row.buyer_id == Some(user as i64) || row.seller_id == Some(user as i64) {
            return Err(EscrowError::Validation(
                "cannot occupy both sides of a trade".into(),
            ));
        }
        let (column, taken) = match side {
            PartySide::Buyer => ("buyer_id", row.buyer_id.is_some()),
            PartySide::Seller => ("seller_id", row.seller_id.is_some()),
        };
        if taken {
            return Err(EscrowError::Validation("side already taken".into()));
        }

        let sql = format!("UPDATE escrow_transactions SET {column} = $2 WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(user as i64)
            .execute(&mut *tx)
            .await?;

        if side == PartySide::Seller {
            if let Some(details) = &details {
                write_details(&mut tx, id, details).await?;
            }
        }

        let updated = fetch_one(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn update_details(
        &self,
        id: TransactionId,
        details: ProductDetails,
    ) -> Result<Transaction, EscrowError> {
        let mut tx = self.pool.begin().await?;
        let row = lock_row(&mut tx, id).await?;

        if row.status != TradeStatus::Pending.id() {
            return Err(EscrowError::Conflict {
                expected: TradeStatus::Pending,
            });
        }
        if row.buyer_id.is_some() && row.seller_id.is_some() {
            return Err(EscrowError::Validation(
                "details are frozen once the counterpart joined".into(),
            ));
        }

        write_details(&mut tx, id, &details).await?;
        let updated = fetch_one(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn set_confirmed(
        &self,
        id: TransactionId,
        side: PartySide,
    ) -> Result<Transaction, EscrowError> {
        let column = match side {
            PartySide::Buyer => "buyer_confirmed",
            PartySide::Seller => "seller_confirmed",
        };
        let sql = format!("UPDATE escrow_transactions SET {column} = TRUE WHERE id = $1");
        let res = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() != 1 {
            return Err(EscrowError::NotFound(id.to_string()));
        }
        let mut conn = self.pool.acquire().await?;
        fetch_one(&mut conn, id).await
    }

    async fn balance(&self, user: UserId) -> Result<Decimal, EscrowError> {
        let row = sqlx::query("SELECT balance FROM wallet_accounts WHERE user_id = $1")
            .bind(user as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("balance")?,
            None => Decimal::ZERO,
        })
    }

    async fn credit_wallet(&self, user: UserId, amount: Decimal) -> Result<(), EscrowError> {
        let mut conn = self.pool.acquire().await?;
        apply_wallet_op(&mut conn, &WalletOp::Credit { user, amount }).await
    }

    async fn debit_wallet(&self, user: UserId, amount: Decimal) -> Result<(), EscrowError> {
        let mut conn = self.pool.acquire().await?;
        apply_wallet_op(&mut conn, &WalletOp::Debit { user, amount }).await
    }
}
