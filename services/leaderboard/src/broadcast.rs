//! Fan-out Broadcaster: non-blocking delivery to channel subscribers
//!
//! Delivery never blocks on a slow recipient: each connection has a
//! bounded outbound queue, the event is serialized exactly once, and
//! enqueueing uses `try_send`. A saturated queue either skips that
//! connection for this event alone or disconnects it, per policy; a
//! closed queue always disconnects.
//!
//! FIFO per connection is inherited from the queue. No exactly-once
//! guarantee exists across a concurrent subscribe/broadcast race: a
//! subscriber joining mid-broadcast may or may not see that event.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use types::errors::LeaderboardError;
use types::ids::{ConnectionId, MemberId};

use crate::events::{OutboundFrame, RankingEvent};
use crate::metrics::ServiceMetrics;
use crate::registry::{ConnectionRegistry, OutboundPayload, Recipient};

/// What to do with a connection whose outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Skip this connection for this event; it stays connected.
    SkipEvent,
    /// Disconnect the lagging connection immediately.
    Disconnect,
}

/// Broadcaster configuration.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub drop_policy: DropPolicy,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            drop_policy: DropPolicy::SkipEvent,
        }
    }
}

/// Outcome of one fan-out pass over a channel's subscriber snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames accepted into subscriber queues.
    pub delivered: usize,
    /// Subscribers skipped because their queue was full.
    pub skipped: usize,
    /// Connections torn down during this pass (closed or lagging).
    pub disconnected: Vec<ConnectionId>,
}

/// Delivers events to the current subscriber snapshot of a channel.
pub struct FanoutBroadcaster {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServiceMetrics>,
    config: BroadcasterConfig,
}

impl FanoutBroadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<ServiceMetrics>,
        config: BroadcasterConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
        }
    }

    /// Publish a ranking event to its channel's current subscribers.
    pub fn deliver(
        &self,
        channel: &str,
        event: &RankingEvent,
    ) -> Result<DeliveryReport, LeaderboardError> {
        let frame = OutboundFrame::from(event);
        let report = self.deliver_frame(channel, &frame)?;
        ServiceMetrics::incr(&self.metrics.events_published);
        debug!(
            channel,
            kind = event.kind_label(),
            delivered = report.delivered,
            skipped = report.skipped,
            disconnected = report.disconnected.len(),
            "event fan-out complete"
        );
        Ok(report)
    }

    /// Deliver an arbitrary frame to a channel's current subscribers.
    pub fn deliver_frame(
        &self,
        channel: &str,
        frame: &OutboundFrame,
    ) -> Result<DeliveryReport, LeaderboardError> {
        let payload = serialize(frame)?;
        // Snapshot under the registry's shard locks, deliver outside them.
        let recipients = self.registry.subscribers(channel);
        Ok(self.fan_out(&recipients, payload))
    }

    /// Deliver a frame to every connection of one member.
    pub fn send_to_member(
        &self,
        member: MemberId,
        frame: &OutboundFrame,
    ) -> Result<DeliveryReport, LeaderboardError> {
        let payload = serialize(frame)?;
        let recipients = self.registry.connections_of(member);
        Ok(self.fan_out(&recipients, payload))
    }

    fn fan_out(&self, recipients: &[Recipient], payload: OutboundPayload) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for recipient in recipients {
            match recipient.sender.try_send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => match self.config.drop_policy {
                    DropPolicy::SkipEvent => {
                        report.skipped += 1;
                        ServiceMetrics::incr(&self.metrics.frames_skipped);
                        warn!(
                            connection_id = %recipient.connection_id,
                            member = %recipient.member,
                            "outbound queue full, skipping event for connection"
                        );
                    }
                    DropPolicy::Disconnect => {
                        self.drop_connection(recipient, &mut report, "lagging");
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    self.drop_connection(recipient, &mut report, "closed");
                }
            }
        }

        ServiceMetrics::add(&self.metrics.frames_delivered, report.delivered as u64);
        report
    }

    fn drop_connection(&self, recipient: &Recipient, report: &mut DeliveryReport, why: &str) {
        self.registry.disconnect(recipient.connection_id);
        report.disconnected.push(recipient.connection_id);
        ServiceMetrics::incr(&self.metrics.connections_dropped);
        warn!(
            connection_id = %recipient.connection_id,
            member = %recipient.member,
            why,
            "dropping connection during fan-out"
        );
    }
}

fn serialize(frame: &OutboundFrame) -> Result<OutboundPayload, LeaderboardError> {
    let json = serde_json::to_string(frame)
        .map_err(|e| LeaderboardError::transient(format!("frame serialization: {}", e)))?;
    Ok(Arc::from(json.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use types::scope::Scope;

    use crate::registry::RegistryConfig;

    fn setup(policy: DropPolicy) -> (Arc<ConnectionRegistry>, FanoutBroadcaster) {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let broadcaster = FanoutBroadcaster::new(
            Arc::clone(&registry),
            Arc::new(ServiceMetrics::new()),
            BroadcasterConfig {
                drop_policy: policy,
            },
        );
        (registry, broadcaster)
    }

    fn attach(
        registry: &ConnectionRegistry,
        member: u64,
        channel: &str,
        capacity: usize,
    ) -> (ConnectionId, mpsc::Receiver<OutboundPayload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ConnectionId::new();
        registry.connect(id, MemberId::new(member), tx, Some(channel));
        (id, rx)
    }

    fn sample_event() -> RankingEvent {
        RankingEvent::for_scope(Scope::Global, MemberId::new(42), 1350, Some(7), 0)
    }

    #[tokio::test]
    async fn test_delivers_to_subscribers_only() {
        let (registry, broadcaster) = setup(DropPolicy::SkipEvent);
        let (_u, mut rx_u) = attach(&registry, 1, "leaderboard_category_math", 8);
        let (_v, mut rx_v) = attach(&registry, 2, "leaderboard", 8);

        let event = RankingEvent::for_scope(
            Scope::Category(types::ids::CategoryId::new("math")),
            MemberId::new(1),
            10,
            Some(1),
            0,
        );
        let report = broadcaster
            .deliver("leaderboard_category_math", &event)
            .unwrap();

        assert_eq!(report.delivered, 1);
        let payload = rx_u.try_recv().unwrap();
        assert!(payload.contains("category_update"));
        assert!(rx_v.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_is_skipped_not_blocking() {
        let (registry, broadcaster) = setup(DropPolicy::SkipEvent);
        let (slow, _rx_slow) = attach(&registry, 1, "leaderboard", 1);
        let (_fast, mut rx_fast) = attach(&registry, 2, "leaderboard", 8);

        // First event fills the slow queue (capacity 1, never drained).
        broadcaster.deliver("leaderboard", &sample_event()).unwrap();
        let report = broadcaster.deliver("leaderboard", &sample_event()).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.disconnected.is_empty());
        // The slow client is still registered.
        assert!(registry.is_subscribed(slow, "leaderboard"));
        // The fast client saw both events in order.
        assert!(rx_fast.try_recv().is_ok());
        assert!(rx_fast.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_policy_drops_lagging_client() {
        let (registry, broadcaster) = setup(DropPolicy::Disconnect);
        let (slow, _rx_slow) = attach(&registry, 1, "leaderboard", 1);

        broadcaster.deliver("leaderboard", &sample_event()).unwrap();
        let report = broadcaster.deliver("leaderboard", &sample_event()).unwrap();

        assert_eq!(report.disconnected, vec![slow]);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_triggers_disconnect() {
        let (registry, broadcaster) = setup(DropPolicy::SkipEvent);
        let (id, rx) = attach(&registry, 1, "leaderboard", 8);
        drop(rx); // Transport went away without a clean disconnect.

        let report = broadcaster.deliver("leaderboard", &sample_event()).unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.disconnected, vec![id]);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_no_delivery_after_disconnect() {
        let (registry, broadcaster) = setup(DropPolicy::SkipEvent);
        let (id, mut rx) = attach(&registry, 1, "leaderboard", 8);

        registry.disconnect(id);
        broadcaster.deliver("leaderboard", &sample_event()).unwrap();

        // The queue was closed on disconnect; nothing arrived.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_member_reaches_all_tabs() {
        let (registry, broadcaster) = setup(DropPolicy::SkipEvent);
        let (_t1, mut rx1) = attach(&registry, 1, "leaderboard", 8);
        let (t2, mut rx2) = attach(&registry, 1, "other_channel", 8);
        let (_other, mut rx3) = attach(&registry, 2, "leaderboard", 8);
        let _ = t2;

        let frame = OutboundFrame::Error {
            message: "hello".to_string(),
        };
        let report = broadcaster.send_to_member(MemberId::new(1), &frame).unwrap();

        assert_eq!(report.delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }
}
