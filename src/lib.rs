//! Escrow transaction engine for a peer-to-peer marketplace.
//!
//! Core pieces:
//! - `escrow`: the transaction ledger and its state machine, with CAS status
//!   updates and wallet mutations committed as one atomic unit.
//! - `funding`: wallet top-ups settled by a payment-provider webhook, and
//!   staff-reviewed withdrawals.
//! - `notify`: per-transaction broadcast channels plus fan-out sinks for
//!   committed transition events.
//! - `gateway`: the axum HTTP/WebSocket surface.

pub mod config;
pub mod core_types;
pub mod error;
pub mod escrow;
pub mod funding;
pub mod gateway;
pub mod logging;
pub mod notify;

pub use core_types::{TransactionId, UserId};
pub use error::EscrowError;
