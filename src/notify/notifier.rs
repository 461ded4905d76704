//! Event fan-out.
//!
//! Realtime delivery uses one broadcast channel per transaction id; UIs
//! subscribe for the trades they are watching and unsubscribe on teardown.
//! The notifier itself is lifecycle-agnostic: it holds no reference to any
//! subscriber beyond the channel handles.
//!
//! Delivery is best-effort. A dropped notification never rolls back the
//! already-committed transition; failures are logged and swallowed here.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::event::TransitionEvent;
use crate::core_types::TransactionId;

/// Capacity per transaction channel; lagging subscribers lose oldest events
/// and re-fetch state, which the at-least-once contract allows.
const CHANNEL_CAPACITY: usize = 64;

/// Out-of-band observer (risk heuristics, staff bot, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &TransitionEvent) -> anyhow::Result<()>;
}

/// Fan-out hub for committed transition events.
pub struct EventNotifier {
    channels: DashMap<TransactionId, broadcast::Sender<TransitionEvent>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventNotifier {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            sinks: Vec::new(),
        }
    }

    /// Register an out-of-band sink. Builder-style, used at startup.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Subscribe to events for one transaction.
    pub fn subscribe(&self, id: TransactionId) -> broadcast::Receiver<TransitionEvent> {
        self.channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the channel once the last receiver is gone. Callers invoke this
    /// from their teardown path; a still-watched channel is kept.
    pub fn unsubscribe(&self, id: TransactionId) {
        self.channels
            .remove_if(&id, |_, sender| sender.receiver_count() == 0);
    }

    /// Publish a committed event to subscribers and sinks.
    ///
    /// Never fails: per-sink errors are logged and suppressed.
    pub async fn publish(&self, event: TransitionEvent) {
        if let Some(sender) = self.channels.get(&event.transaction_id) {
            // Err here only means nobody is listening right now
            if sender.send(event.clone()).is_err() {
                debug!(
                    transaction_id = %event.transaction_id,
                    kind = event.kind.as_str(),
                    "no live subscribers for event"
                );
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&event).await {
                warn!(
                    sink = sink.name(),
                    transaction_id = %event.transaction_id,
                    kind = event.kind.as_str(),
                    error = %e,
                    "event sink delivery failed (suppressed)"
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::status::TradeStatus;
    use crate::notify::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event(id: TransactionId) -> TransitionEvent {
        TransitionEvent::new(
            id,
            EventKind::Funded,
            TradeStatus::Pending,
            TradeStatus::Deposited,
            1,
        )
    }

    struct CountingSink {
        delivered: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _event: &TransitionEvent) -> anyhow::Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("sink down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let notifier = EventNotifier::new();
        let id = TransactionId::new();
        let mut rx = notifier.subscribe(id);

        notifier.publish(sample_event(id)).await;
        let got = rx.recv().await.unwrap();
        assert_eq!(got.transaction_id, id);
        assert_eq!(got.kind, EventKind::Funded);
    }

    #[tokio::test]
    async fn test_events_scoped_by_transaction() {
        let notifier = EventNotifier::new();
        let watched = TransactionId::new();
        let other = TransactionId::new();
        let mut rx = notifier.subscribe(watched);

        notifier.publish(sample_event(other)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_is_suppressed() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
            fail: true,
        });
        let notifier = EventNotifier::new().with_sink(sink.clone());

        // Must not panic or error out even though the sink fails
        notifier.publish(sample_event(TransactionId::new())).await;
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_sinks_get_every_event() {
        let a = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
            fail: false,
        });
        let b = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
            fail: true,
        });
        let notifier = EventNotifier::new()
            .with_sink(a.clone())
            .with_sink(b.clone());

        let id = TransactionId::new();
        notifier.publish(sample_event(id)).await;
        notifier.publish(sample_event(id)).await;

        assert_eq!(a.delivered.load(Ordering::SeqCst), 2);
        assert_eq!(b.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_idle_channel() {
        let notifier = EventNotifier::new();
        let id = TransactionId::new();
        let rx = notifier.subscribe(id);
        assert_eq!(notifier.channel_count(), 1);

        // Still watched: unsubscribe keeps the channel
        notifier.unsubscribe(id);
        assert_eq!(notifier.channel_count(), 1);

        drop(rx);
        notifier.unsubscribe(id);
        assert_eq!(notifier.channel_count(), 0);
    }
}
