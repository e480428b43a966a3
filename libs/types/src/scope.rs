//! Leaderboard scopes and channel naming
//!
//! A scope is one ranked partition: the global board or a single
//! category board. The category set is fixed at configuration time;
//! there is no dynamic scope creation.
//!
//! Channel names follow the client wire format:
//! - global: `leaderboard`
//! - per category: `leaderboard_category_{name}`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::CategoryId;

/// Channel name prefix for category leaderboards.
pub const CATEGORY_CHANNEL_PREFIX: &str = "leaderboard_category_";

/// Channel name for the global leaderboard.
pub const GLOBAL_CHANNEL: &str = "leaderboard";

/// A leaderboard partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "category", rename_all = "snake_case")]
pub enum Scope {
    /// The single global board every member appears on.
    Global,
    /// One per-category board.
    Category(CategoryId),
}

impl Scope {
    /// The fan-out channel carrying live updates for this scope.
    pub fn channel_name(&self) -> String {
        match self {
            Scope::Global => GLOBAL_CHANNEL.to_string(),
            Scope::Category(cat) => format!("{}{}", CATEGORY_CHANNEL_PREFIX, cat),
        }
    }

    /// Parse a channel name back into a scope.
    ///
    /// Returns None for channel names that do not carry ranking events.
    pub fn from_channel_name(channel: &str) -> Option<Self> {
        if channel == GLOBAL_CHANNEL {
            return Some(Scope::Global);
        }
        let name = channel.strip_prefix(CATEGORY_CHANNEL_PREFIX)?;
        CategoryId::try_new(name).map(Scope::Category)
    }

    /// A short label for logging and cache keys.
    pub fn label(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Category(cat) => format!("category:{}", cat),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
