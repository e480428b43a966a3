//! Error taxonomy for the ranking core
//!
//! Four failure classes with distinct handling policies:
//! - transient store errors are retried with bounded backoff
//! - validation errors are rejected immediately and never retried
//! - connection errors tear down one connection and propagate no further
//! - lookups of unranked members return a sentinel, not an error
//!
//! Errors are `Clone` so single-flight cache waiters can all receive
//! the leader's failure.

use thiserror::Error;

use crate::ids::{ConnectionId, MemberId};

/// Top-level error for the ranking core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardError {
    /// Durable layer or index momentarily unavailable. Retryable.
    #[error("transient store error: {reason}")]
    TransientStore { reason: String },

    /// Caller contract violation. Never retried.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Broken transport for a single connection.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Retry budget exhausted while talking to the durable layer.
    #[error("durable commit failed after {attempts} attempts: {reason}")]
    CommitExhausted { attempts: u32, reason: String },
}

/// Caller contract violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown scope: {scope}")]
    UnknownScope { scope: String },

    #[error("unknown category: {category}")]
    UnknownCategory { category: String },

    #[error("invalid delta for member {member}: {reason}")]
    InvalidDelta { member: MemberId, reason: String },

    #[error("invalid pagination window: skip={skip}, limit={limit}")]
    InvalidWindow { skip: usize, limit: usize },
}

/// Per-connection transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection not found: {connection_id}")]
    NotFound { connection_id: ConnectionId },

    #[error("connection {connection_id} closed its outbound channel")]
    Closed { connection_id: ConnectionId },

    #[error("subscription limit ({limit}) reached for connection {connection_id}")]
    SubscriptionLimit {
        connection_id: ConnectionId,
        limit: usize,
    },
}

impl LeaderboardError {
    /// Whether the failure class is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LeaderboardError::TransientStore { .. })
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        LeaderboardError::TransientStore {
            reason: reason.into(),
        }
    }
}
