//! Real-time ranking and notification fan-out core
//!
//! Keeps a fast, concurrently-mutated ranked view consistent with the
//! authoritative durable score totals while pushing live updates to
//! many independent, slow, and unreliable client connections without
//! blocking writers or losing updates.
//!
//! # Architecture
//!
//! ```text
//!        apply_score_delta
//!               │
//!        ┌──────▼───────┐
//!        │UpdatePipeline│ ← durable commit first, always
//!        └──────┬───────┘
//!          ┌────┴─────┬────────────┐
//!          │          │            │
//!     ┌────▼───┐ ┌────▼────┐ ┌────▼────┐
//!     │Ranking │ │Snapshot │ │ Fan-out │
//!     │ Store  │ │  Cache  │ │Broadcast│
//!     └────▲───┘ └────▲────┘ └────┬────┘
//!          │          │           │
//!     ┌────┴──────────┴───┐ ┌────▼─────┐
//!     │ LeaderboardReader │ │Connection│
//!     │   (query side)    │ │ Registry │
//!     └───────────────────┘ └──────────┘
//! ```
//!
//! The durable score store is a collaborator behind the
//! [`pipeline::ScoreStore`] trait; everything here is derived from its
//! totals and rebuildable from them after a restart.

pub mod broadcast;
pub mod cache;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod ranking;
pub mod registry;
pub mod views;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
