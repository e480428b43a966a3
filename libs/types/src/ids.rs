//! Unique identifier types for ranking entities
//!
//! Members are keyed by integer ids assigned by the account service.
//! Connections use UUID v7 for time-sortable ordering, so a connection
//! log can be replayed in accept order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a ranked member
///
/// Integer-keyed to match the account service's user ids. Ordering on
/// `MemberId` is part of the public contract: it is the tie-break for
/// members with equal scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(u64);

impl MemberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a live client connection
///
/// Uses UUID v7 for time-based sorting. One member may own many
/// connections (multiple tabs/devices), each with its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new ConnectionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category identifier (leaderboard partition name)
///
/// Lowercase alphanumeric plus `_`, non-empty (e.g. "math", "logic").
/// The format restriction keeps category names safe to embed in
/// channel names and cache keys without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    /// Create a new CategoryId from a string
    ///
    /// # Panics
    /// Panics if the format is invalid
    pub fn new(name: impl Into<String>) -> Self {
        Self::try_new(name).expect("CategoryId must be lowercase alphanumeric or '_'")
    }

    /// Try to create a CategoryId, returning None if invalid
    pub fn try_new(name: impl Into<String>) -> Option<Self> {
        let s = name.into();
        let valid = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Get the name string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_ordering() {
        let a = MemberId::new(1);
        let b = MemberId::new(2);
        assert!(a < b);
    }

    #[test]
    fn test_member_id_serialization() {
        let id = MemberId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");

        let deserialized: MemberId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_connection_id_creation() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2, "ConnectionIds should be unique");
    }

    #[test]
    fn test_connection_id_serialization() {
        let id = ConnectionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_category_id_creation() {
        let cat = CategoryId::new("math");
        assert_eq!(cat.as_str(), "math");
    }

    #[test]
    fn test_category_id_try_new() {
        assert!(CategoryId::try_new("logic_2").is_some());
        assert!(CategoryId::try_new("").is_none());
        assert!(CategoryId::try_new("Math").is_none());
        assert!(CategoryId::try_new("math puzzles").is_none());
    }

    #[test]
    #[should_panic(expected = "CategoryId must be lowercase")]
    fn test_category_id_invalid_format() {
        CategoryId::new("Not Valid");
    }

    #[test]
    fn test_category_id_serialization() {
        let cat = CategoryId::new("word");
        let json = serde_json::to_string(&cat).unwrap();
        assert_eq!(json, "\"word\"");

        let deserialized: CategoryId = serde_json::from_str(&json).unwrap();
        assert_eq!(cat, deserialized);
    }
}
