//! Escrow Error Types
//!
//! One taxonomy for the whole engine. Error codes are stable strings used in
//! API responses; HTTP status suggestions live next to them so the gateway
//! mapping stays in one place.

use thiserror::Error;

use crate::escrow::status::TradeStatus;

/// Errors surfaced by the ledger, state machine, and funding paths.
#[derive(Error, Debug, Clone)]
pub enum EscrowError {
    // === Validation ===
    #[error("Invalid input: {0}")]
    Validation(String),

    // === Concurrency ===
    /// CAS precondition failed: the stored status no longer matches what the
    /// caller observed. Re-read and decide; do not blindly retry.
    #[error("Transaction status changed concurrently (expected {expected})")]
    Conflict { expected: TradeStatus },

    // === State machine ===
    #[error("No transition {action} from status {from}")]
    InvalidTransition { from: TradeStatus, action: &'static str },

    #[error("Role not permitted for {action} from status {from}")]
    UnauthorizedTransition { from: TradeStatus, action: &'static str },

    #[error("Dispute window closed at {deadline}")]
    WindowExpired { deadline: chrono::DateTime<chrono::Utc> },

    // === Wallet ===
    #[error("Insufficient wallet balance")]
    InsufficientFunds,

    // === Lookup ===
    #[error("Transaction not found: {0}")]
    NotFound(String),

    // === Funding ===
    #[error("Payment reference already settled")]
    AlreadyProcessed,

    #[error("Paid amount {paid} outside tolerance of expected {expected}")]
    AmountMismatch {
        expected: rust_decimal::Decimal,
        paid: rust_decimal::Decimal,
    },

    #[error("No pending top-up matches the payment reference")]
    UnmatchedReference,

    // === System ===
    #[error("Database error: {0}")]
    Database(String),
}

impl EscrowError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::Validation(_) => "VALIDATION_ERROR",
            EscrowError::Conflict { .. } => "CONFLICT",
            EscrowError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EscrowError::UnauthorizedTransition { .. } => "UNAUTHORIZED_TRANSITION",
            EscrowError::WindowExpired { .. } => "WINDOW_EXPIRED",
            EscrowError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            EscrowError::NotFound(_) => "NOT_FOUND",
            EscrowError::AlreadyProcessed => "ALREADY_PROCESSED",
            EscrowError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            EscrowError::UnmatchedReference => "UNMATCHED_REFERENCE",
            EscrowError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// HTTP status code suggestion for the gateway.
    pub fn http_status(&self) -> u16 {
        match self {
            EscrowError::Validation(_) | EscrowError::AmountMismatch { .. } => 400,
            EscrowError::UnauthorizedTransition { .. } => 403,
            EscrowError::NotFound(_) | EscrowError::UnmatchedReference => 404,
            EscrowError::Conflict { .. } | EscrowError::AlreadyProcessed => 409,
            EscrowError::InvalidTransition { .. }
            | EscrowError::WindowExpired { .. }
            | EscrowError::InsufficientFunds => 422,
            EscrowError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for EscrowError {
    fn from(e: sqlx::Error) -> Self {
        EscrowError::Database(e.to_string())
    }
}
