//! Wallet funding: top-up intents settled by a payment-provider webhook, and
//! staff-reviewed withdrawals. Both sides move money through the same wallet
//! ledger the escrow engine holds funds in.

pub mod db;
pub mod deposit;
pub mod store;
pub mod types;
pub mod withdraw;

pub use db::PgFunding;
pub use deposit::DepositService;
pub use store::{FundingStore, MemoryFunding};
pub use types::{IntentStatus, TopUpIntent, WithdrawStatus, Withdrawal};
pub use withdraw::WithdrawService;
