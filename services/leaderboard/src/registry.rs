//! Connection Registry: live connections and their subscriptions
//!
//! Tracks every active connection, which member owns it, and which
//! channels it subscribes to. Subscriptions are per-connection, so
//! multiple tabs or devices of one member can watch different boards
//! independently; the per-member map exists for personal messages and
//! last-connection cleanup.
//!
//! Sharded via `DashMap`: connects and disconnects on different
//! connections never contend, and subscriber snapshots for broadcast
//! are point-in-time copies so no lock is ever held across I/O.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::errors::{ConnectionError, LeaderboardError};
use types::ids::{ConnectionId, MemberId};

/// Serialized frame handed to a connection's outbound queue.
///
/// `Arc<str>` so a broadcast serializes each event once, regardless of
/// subscriber count.
pub type OutboundPayload = Arc<str>;

/// Sending half of a connection's bounded outbound queue.
pub type OutboundSender = mpsc::Sender<OutboundPayload>;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Max channels one connection may subscribe to.
    pub max_subscriptions_per_connection: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 50,
        }
    }
}

/// Per-connection state.
#[derive(Debug)]
struct ConnectionState {
    member: MemberId,
    /// Channels this connection is subscribed to.
    channels: BTreeSet<String>,
    sender: OutboundSender,
}

/// A point-in-time delivery target captured from the registry.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub connection_id: ConnectionId,
    pub member: MemberId,
    pub sender: OutboundSender,
}

/// Tracks all connected clients, their owners, and their subscriptions.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionState>,
    /// Member → owned connection ids, for personal delivery and teardown.
    members: DashMap<MemberId, BTreeSet<ConnectionId>>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            connections: DashMap::new(),
            members: DashMap::new(),
            config,
        }
    }

    /// Register a connection, optionally subscribing it to a channel.
    pub fn connect(
        &self,
        connection_id: ConnectionId,
        member: MemberId,
        sender: OutboundSender,
        channel: Option<&str>,
    ) {
        let mut channels = BTreeSet::new();
        if let Some(channel) = channel {
            channels.insert(channel.to_string());
        }
        self.connections.insert(
            connection_id,
            ConnectionState {
                member,
                channels,
                sender,
            },
        );
        self.members
            .entry(member)
            .or_default()
            .insert(connection_id);
        debug!(%connection_id, %member, "connection registered");
    }

    /// Subscribe one connection to a channel.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        channel: &str,
    ) -> Result<(), LeaderboardError> {
        let mut state = self.connections.get_mut(&connection_id).ok_or(
            ConnectionError::NotFound { connection_id },
        )?;
        if !state.channels.contains(channel)
            && state.channels.len() >= self.config.max_subscriptions_per_connection
        {
            return Err(ConnectionError::SubscriptionLimit {
                connection_id,
                limit: self.config.max_subscriptions_per_connection,
            }
            .into());
        }
        state.channels.insert(channel.to_string());
        debug!(%connection_id, channel, "subscribed");
        Ok(())
    }

    /// Unsubscribe one connection from a channel. No-op if absent.
    pub fn unsubscribe(
        &self,
        connection_id: ConnectionId,
        channel: &str,
    ) -> Result<(), LeaderboardError> {
        let mut state = self.connections.get_mut(&connection_id).ok_or(
            ConnectionError::NotFound { connection_id },
        )?;
        state.channels.remove(channel);
        Ok(())
    }

    /// Remove a connection from every channel and from its member's
    /// connection set; the member entry itself is dropped with its
    /// last connection.
    ///
    /// The connection entry is removed first, so any broadcast snapshot
    /// taken afterwards cannot include it. A snapshot taken just before
    /// still cannot deliver: dropping the transport's receiving half
    /// closes the queue and delivery fails over to a no-op.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Option<MemberId> {
        let (_, state) = self.connections.remove(&connection_id)?;
        let member = state.member;

        let mut last_connection = false;
        if let Some(mut owned) = self.members.get_mut(&member) {
            owned.remove(&connection_id);
            last_connection = owned.is_empty();
        }
        if last_connection {
            self.members.remove_if(&member, |_, owned| owned.is_empty());
        }

        debug!(%connection_id, %member, last_connection, "connection removed");
        Some(member)
    }

    /// Point-in-time copy of the subscribers of a channel.
    pub fn subscribers(&self, channel: &str) -> Vec<Recipient> {
        self.connections
            .iter()
            .filter(|entry| entry.channels.contains(channel))
            .map(|entry| Recipient {
                connection_id: *entry.key(),
                member: entry.member,
                sender: entry.sender.clone(),
            })
            .collect()
    }

    /// Point-in-time copy of every connection owned by a member.
    pub fn connections_of(&self, member: MemberId) -> Vec<Recipient> {
        let Some(owned) = self.members.get(&member) else {
            return Vec::new();
        };
        let ids: Vec<ConnectionId> = owned.iter().copied().collect();
        drop(owned);

        ids.into_iter()
            .filter_map(|connection_id| {
                let entry = self.connections.get(&connection_id);
                if entry.is_none() {
                    // Raced with a disconnect; the other map catches up below.
                    warn!(%connection_id, %member, "stale member connection entry");
                }
                entry.map(|state| Recipient {
                    connection_id,
                    member: state.member,
                    sender: state.sender.clone(),
                })
            })
            .collect()
    }

    /// Whether a connection currently subscribes to a channel.
    pub fn is_subscribed(&self, connection_id: ConnectionId, channel: &str) -> bool {
        self.connections
            .get(&connection_id)
            .map(|state| state.channels.contains(channel))
            .unwrap_or(false)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of members with at least one live connection.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(
        registry: &ConnectionRegistry,
        member: u64,
        channel: Option<&str>,
    ) -> (ConnectionId, mpsc::Receiver<OutboundPayload>) {
        let (tx, rx) = mpsc::channel(8);
        let id = ConnectionId::new();
        registry.connect(id, MemberId::new(member), tx, channel);
        (id, rx)
    }

    #[test]
    fn test_connect_registers_member() {
        let registry = ConnectionRegistry::default();
        let (_id, _rx) = attach(&registry, 1, Some("leaderboard"));

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.member_count(), 1);
        assert_eq!(registry.subscribers("leaderboard").len(), 1);
    }

    #[test]
    fn test_per_connection_subscriptions() {
        let registry = ConnectionRegistry::default();
        // Same member, two tabs with different subscriptions.
        let (tab1, _rx1) = attach(&registry, 1, Some("leaderboard"));
        let (tab2, _rx2) = attach(&registry, 1, None);
        registry
            .subscribe(tab2, "leaderboard_category_math")
            .unwrap();

        assert!(registry.is_subscribed(tab1, "leaderboard"));
        assert!(!registry.is_subscribed(tab2, "leaderboard"));
        assert_eq!(registry.subscribers("leaderboard_category_math").len(), 1);
        assert_eq!(registry.member_count(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_membership() {
        let registry = ConnectionRegistry::default();
        let (id, _rx) = attach(&registry, 1, Some("leaderboard"));

        registry.unsubscribe(id, "leaderboard").unwrap();
        assert!(registry.subscribers("leaderboard").is_empty());
    }

    #[test]
    fn test_disconnect_removes_everywhere() {
        let registry = ConnectionRegistry::default();
        let (id, _rx) = attach(&registry, 1, Some("leaderboard"));
        registry.subscribe(id, "leaderboard_category_math").unwrap();

        let member = registry.disconnect(id);
        assert_eq!(member, Some(MemberId::new(1)));
        assert!(registry.subscribers("leaderboard").is_empty());
        assert!(registry.subscribers("leaderboard_category_math").is_empty());
        assert_eq!(registry.member_count(), 0);
    }

    #[test]
    fn test_disconnect_keeps_member_with_other_connections() {
        let registry = ConnectionRegistry::default();
        let (tab1, _rx1) = attach(&registry, 1, Some("leaderboard"));
        let (_tab2, _rx2) = attach(&registry, 1, Some("leaderboard"));

        registry.disconnect(tab1);
        assert_eq!(registry.member_count(), 1);
        assert_eq!(registry.connections_of(MemberId::new(1)).len(), 1);
    }

    #[test]
    fn test_subscribe_unknown_connection() {
        let registry = ConnectionRegistry::default();
        let err = registry
            .subscribe(ConnectionId::new(), "leaderboard")
            .unwrap_err();
        assert!(matches!(
            err,
            LeaderboardError::Connection(ConnectionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_subscription_limit() {
        let registry = ConnectionRegistry::new(RegistryConfig {
            max_subscriptions_per_connection: 2,
        });
        let (id, _rx) = attach(&registry, 1, None);

        registry.subscribe(id, "leaderboard").unwrap();
        registry.subscribe(id, "leaderboard_category_math").unwrap();
        // Re-subscribing an existing channel is allowed at the limit.
        registry.subscribe(id, "leaderboard").unwrap();

        let err = registry
            .subscribe(id, "leaderboard_category_logic")
            .unwrap_err();
        assert!(matches!(
            err,
            LeaderboardError::Connection(ConnectionError::SubscriptionLimit { .. })
        ));
    }

    #[test]
    fn test_subscriber_snapshot_is_point_in_time() {
        let registry = ConnectionRegistry::default();
        let (id, _rx) = attach(&registry, 1, Some("leaderboard"));

        let snapshot = registry.subscribers("leaderboard");
        registry.disconnect(id);

        // The snapshot still holds the recipient; its queue is closed,
        // so delivery through it is a no-op. New snapshots are empty.
        assert_eq!(snapshot.len(), 1);
        assert!(registry.subscribers("leaderboard").is_empty());
    }
}
