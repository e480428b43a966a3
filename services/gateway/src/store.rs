//! In-process durable-store stand-in.
//!
//! The authoritative score totals live in the persistence service;
//! this implementation keeps them in a process-local map so the
//! gateway runs end to end in development. It honors the collaborator
//! contract the pipeline depends on: commits are atomic per member and
//! totals are readable per scope for index rebuilds.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use leaderboard::pipeline::{CommittedTotals, ScoreStore};
use types::errors::LeaderboardError;
use types::ids::{CategoryId, MemberId};
use types::scope::Scope;

/// Process-local score totals keyed by (category, member); the global
/// total uses a `None` category.
#[derive(Default)]
pub struct InMemoryScoreStore {
    totals: Mutex<HashMap<(Option<CategoryId>, MemberId), i64>>,
}

impl InMemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScoreStore for InMemoryScoreStore {
    async fn commit_delta(
        &self,
        member: MemberId,
        points: i64,
        category: Option<&CategoryId>,
    ) -> Result<CommittedTotals, LeaderboardError> {
        let mut totals = self
            .totals
            .lock()
            .map_err(|_| LeaderboardError::transient("score table poisoned"))?;

        let global = totals.entry((None, member)).or_insert(0);
        *global += points;
        let global_total = *global;

        let category_total = category.map(|cat| {
            let entry = totals.entry((Some(cat.clone()), member)).or_insert(0);
            *entry += points;
            *entry
        });

        Ok(CommittedTotals {
            global_total,
            category_total,
        })
    }

    async fn load_scope(
        &self,
        scope: &Scope,
    ) -> Result<Vec<(MemberId, i64)>, LeaderboardError> {
        let wanted = match scope {
            Scope::Global => None,
            Scope::Category(cat) => Some(cat.clone()),
        };
        let totals = self
            .totals
            .lock()
            .map_err(|_| LeaderboardError::transient("score table poisoned"))?;
        Ok(totals
            .iter()
            .filter(|((cat, _), _)| *cat == wanted)
            .map(|((_, member), total)| (*member, *total))
            .collect())
    }
}
