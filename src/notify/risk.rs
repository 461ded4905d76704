//! Risk heuristics over the event stream.
//!
//! Watches committed transitions and flags trades that complete suspiciously
//! fast after funding (a common wash-trading / stolen-wallet pattern).
//! Alerts are recorded and logged; they never influence the transition
//! itself.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use super::event::{EventKind, TransitionEvent};
use super::notifier::EventSink;
use crate::core_types::TransactionId;

/// A flagged observation, kept for staff review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAlert {
    pub transaction_id: TransactionId,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub struct RiskMonitor {
    /// Funding timestamps for trades still in flight.
    funded_at: DashMap<TransactionId, DateTime<Utc>>,
    /// Fastest believable funded -> completed turnaround.
    min_turnaround: Duration,
    alerts: Mutex<Vec<RiskAlert>>,
}

impl RiskMonitor {
    pub fn new(min_turnaround: Duration) -> Self {
        Self {
            funded_at: DashMap::new(),
            min_turnaround,
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn alerts(&self) -> Vec<RiskAlert> {
        self.alerts.lock().unwrap().clone()
    }

    fn flag(&self, transaction_id: TransactionId, message: String) {
        warn!(%transaction_id, %message, "risk alert");
        self.alerts.lock().unwrap().push(RiskAlert {
            transaction_id,
            message,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl EventSink for RiskMonitor {
    fn name(&self) -> &'static str {
        "risk-monitor"
    }

    async fn deliver(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        match event.kind {
            EventKind::Funded => {
                self.funded_at.insert(event.transaction_id, event.timestamp);
            }
            EventKind::Completed | EventKind::ResolvedRelease => {
                if let Some((_, funded)) = self.funded_at.remove(&event.transaction_id) {
                    let elapsed = (event.timestamp - funded)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if elapsed < self.min_turnaround {
                        self.flag(
                            event.transaction_id,
                            format!(
                                "trade completed {}s after funding (threshold {}s)",
                                elapsed.as_secs(),
                                self.min_turnaround.as_secs()
                            ),
                        );
                    }
                }
            }
            EventKind::Cancelled | EventKind::ResolvedRefund => {
                self.funded_at.remove(&event.transaction_id);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::status::TradeStatus;

    fn event(id: TransactionId, kind: EventKind, at: DateTime<Utc>) -> TransitionEvent {
        let mut e = TransitionEvent::new(id, kind, TradeStatus::Pending, TradeStatus::Deposited, 1);
        e.timestamp = at;
        e
    }

    #[tokio::test]
    async fn test_fast_completion_flagged() {
        let monitor = RiskMonitor::new(Duration::from_secs(600));
        let id = TransactionId::new();
        let t0 = Utc::now();

        monitor.deliver(&event(id, EventKind::Funded, t0)).await.unwrap();
        monitor
            .deliver(&event(
                id,
                EventKind::Completed,
                t0 + chrono::Duration::seconds(30),
            ))
            .await
            .unwrap();

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].transaction_id, id);
    }

    #[tokio::test]
    async fn test_slow_completion_clean() {
        let monitor = RiskMonitor::new(Duration::from_secs(600));
        let id = TransactionId::new();
        let t0 = Utc::now();

        monitor.deliver(&event(id, EventKind::Funded, t0)).await.unwrap();
        monitor
            .deliver(&event(
                id,
                EventKind::Completed,
                t0 + chrono::Duration::hours(2),
            ))
            .await
            .unwrap();

        assert!(monitor.alerts().is_empty());
        // Entry cleaned up either way
        assert!(monitor.funded_at.is_empty());
    }

    #[tokio::test]
    async fn test_refund_clears_tracking_without_alert() {
        let monitor = RiskMonitor::new(Duration::from_secs(600));
        let id = TransactionId::new();
        let t0 = Utc::now();

        monitor.deliver(&event(id, EventKind::Funded, t0)).await.unwrap();
        monitor
            .deliver(&event(id, EventKind::ResolvedRefund, t0))
            .await
            .unwrap();

        assert!(monitor.alerts().is_empty());
        assert!(monitor.funded_at.is_empty());
    }
}
