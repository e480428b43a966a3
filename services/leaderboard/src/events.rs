//! Event and wire message definitions for the ranking core
//!
//! `RankingEvent` is the internal, immutable record of one committed
//! score change. `OutboundFrame` is its client-facing serialization,
//! matching the message vocabulary the web clients already speak
//! (`score_update`, `category_update`, `initial_data`, ...).
//! `ClientMessage` covers the inbound control frames the transport
//! layer maps onto registry calls.

use serde::{Deserialize, Serialize};
use types::ids::{CategoryId, MemberId};
use types::scope::Scope;
use uuid::Uuid;

/// What kind of change a ranking event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A member's global score changed.
    ScoreUpdate,
    /// A member's score on a category board changed.
    CategoryUpdate,
}

/// Immutable record of one committed score change on one scope.
///
/// Carries the post-commit score and rank so subscribers never have to
/// issue a follow-up query. `rank` is None when the member is unranked
/// in the scope (e.g. rank lookup timed out and degraded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEvent {
    /// Unique event identifier (UUID v7)
    pub event_id: Uuid,
    /// Unix nanoseconds timestamp when the event was created
    pub timestamp: i64,
    /// The scope this event concerns
    pub scope: Scope,
    /// The member whose score changed
    pub member: MemberId,
    /// Score after the committed delta
    pub new_score: i64,
    /// 1-based rank after the delta, None if unknown
    pub new_rank: Option<u64>,
    /// Event classification
    pub kind: EventKind,
}

impl RankingEvent {
    /// Build an event for a scope; the kind follows from the scope.
    pub fn for_scope(
        scope: Scope,
        member: MemberId,
        new_score: i64,
        new_rank: Option<u64>,
        timestamp: i64,
    ) -> Self {
        let kind = match scope {
            Scope::Global => EventKind::ScoreUpdate,
            Scope::Category(_) => EventKind::CategoryUpdate,
        };
        Self {
            event_id: Uuid::now_v7(),
            timestamp,
            scope,
            member,
            new_score,
            new_rank,
            kind,
        }
    }

    /// The fan-out channel this event is published on.
    pub fn channel(&self) -> String {
        self.scope.channel_name()
    }

    /// Event kind as a string label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            EventKind::ScoreUpdate => "score_update",
            EventKind::CategoryUpdate => "category_update",
        }
    }
}

/// One row of a ranked leaderboard window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub user_id: MemberId,
    pub score: i64,
    /// 1-based rank within the full scope ordering.
    pub rank: u64,
}

/// Client-facing frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Live global score change.
    ScoreUpdate {
        scope: String,
        user_id: MemberId,
        score: i64,
        rank: Option<u64>,
    },
    /// Live category score change.
    CategoryUpdate {
        category: CategoryId,
        user_id: MemberId,
        score: i64,
        rank: Option<u64>,
    },
    /// Initial global window sent on connect.
    InitialData { data: Vec<LeaderboardRow> },
    /// Initial category window sent on category subscribe.
    CategoryData {
        category: CategoryId,
        data: Vec<LeaderboardRow>,
    },
    /// Protocol-level error report (the connection stays open).
    Error { message: String },
}

impl From<&RankingEvent> for OutboundFrame {
    fn from(event: &RankingEvent) -> Self {
        match &event.scope {
            Scope::Global => OutboundFrame::ScoreUpdate {
                scope: "global".to_string(),
                user_id: event.member,
                score: event.new_score,
                rank: event.new_rank,
            },
            Scope::Category(category) => OutboundFrame::CategoryUpdate {
                category: category.clone(),
                user_id: event.member,
                score: event.new_score,
                rank: event.new_rank,
            },
        }
    }
}

/// Inbound control messages from clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to the global leaderboard channel.
    LeaderboardSubscribe,
    /// Subscribe to one category channel.
    SubscribeCategory { category: String },
    /// Unsubscribe from one category channel.
    UnsubscribeCategory { category: String },
}

/// Parse a raw JSON text frame into a ClientMessage.
pub fn parse_client_message(json: &str) -> Option<ClientMessage> {
    serde_json::from_str(json).ok()
}
