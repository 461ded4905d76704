//! Event Notifier
//!
//! Fan-out of committed state-change events to interested parties.
//!
//! # Delivery contract
//!
//! 1. **After commit only**: events are published once the CAS transition has
//!    committed; a notification can never precede or outlive a failed write.
//! 2. **At-least-once, best-effort**: a dropped notification never rolls back
//!    the transition. Failures are logged and suppressed.
//! 3. **Idempotent consumers**: every event carries a unique `event_id` for
//!    dedupe.

pub mod bot;
pub mod event;
pub mod notifier;
pub mod risk;

pub use bot::StaffBot;
pub use event::{EventKind, TransitionEvent};
pub use notifier::{EventNotifier, EventSink};
pub use risk::{RiskAlert, RiskMonitor};
