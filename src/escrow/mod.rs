//! Escrow transaction engine.
//!
//! A trade moves through a fixed state machine; funds held in escrow follow
//! the status:
//!
//! ```text
//! pending ──fund──▶ deposited ──ship──▶ shipping ──confirm──▶ completed
//!    │                  │                   │
//!    ▼ cancel           └──────dispute──────┘
//! cancelled                      │
//!                             disputed ──release──▶ completed
//!                                │
//!                                └──────refund────▶ refunded
//! ```
//!
//! Every status write is a CAS update paired atomically with its wallet
//! mutation, so concurrent callers serialize and funds are conserved.

pub mod action;
pub mod actor;
pub mod db;
pub mod engine;
pub mod model;
pub mod status;
pub mod store;

pub use action::{dispute_window_open, EscrowAction};
pub use actor::{Actor, Role};
pub use engine::EscrowEngine;
pub use model::{
    fee_for, FeeBearer, NewTransaction, PartySide, ProductDetails, Transaction, TransitionPatch,
};
pub use status::TradeStatus;
pub use store::{EscrowStore, MemoryStore, WalletOp};
