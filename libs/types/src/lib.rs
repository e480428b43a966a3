//! Types library for the live ranking platform
//!
//! This library provides the core type definitions shared between the
//! leaderboard core and its transport layer: identifiers, leaderboard
//! scopes, and the error taxonomy.
//!
//! # Modules
//! - `ids`: Unique identifiers (MemberId, ConnectionId, CategoryId)
//! - `scope`: Leaderboard partitions and channel naming
//! - `errors`: Error taxonomy

// Public modules
pub mod errors;
pub mod ids;
pub mod scope;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::scope::*;
}
