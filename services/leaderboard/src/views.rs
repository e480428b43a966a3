//! Read-side leaderboard queries
//!
//! Query handlers read through the snapshot cache, which falls back to
//! the ranking store on miss. Windows are cached per (scope, skip,
//! limit) with a TTL; the update pipeline invalidates them exactly by
//! scope, so a read never serves data contradicting the last committed
//! total once propagation completes.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use types::errors::{LeaderboardError, ValidationError};
use types::ids::MemberId;
use types::scope::Scope;

use crate::cache::{RankedView, SnapshotCache, ViewKey};
use crate::events::LeaderboardRow;
use crate::ranking::RankingStore;

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// How long a computed window stays servable.
    pub view_ttl: Duration,
    /// Largest window one query may request.
    pub max_limit: usize,
    /// Rank/score point reads degrade to None past this deadline.
    pub read_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            // The original read path cached leaderboard pages for 5 minutes.
            view_ttl: Duration::from_secs(300),
            max_limit: 100,
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// A member's own standing in one scope.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MemberStanding {
    pub user_id: MemberId,
    pub score: i64,
    /// None when the member is unranked or the lookup degraded.
    pub rank: Option<u64>,
}

/// Synchronous rank/score queries plus cached window reads.
pub struct LeaderboardReader {
    ranking: Arc<RankingStore>,
    cache: Arc<SnapshotCache>,
    config: ReaderConfig,
}

impl LeaderboardReader {
    pub fn new(
        ranking: Arc<RankingStore>,
        cache: Arc<SnapshotCache>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            ranking,
            cache,
            config,
        }
    }

    /// Ranked window of a scope, best-first, read through the cache.
    ///
    /// Unknown scopes yield an empty window, matching the ranking
    /// store's read contract.
    pub async fn top_n(
        &self,
        scope: Scope,
        skip: usize,
        limit: usize,
    ) -> Result<RankedView, LeaderboardError> {
        if limit == 0 || limit > self.config.max_limit {
            return Err(ValidationError::InvalidWindow { skip, limit }.into());
        }

        let key = ViewKey::new(scope.clone(), skip, limit);
        let ranking = Arc::clone(&self.ranking);
        self.cache
            .get_or_compute(key, self.config.view_ttl, move || {
                let ranking = Arc::clone(&ranking);
                let scope = scope.clone();
                async move { Ok(compute_window(&ranking, &scope, skip, limit)) }
            })
            .await
    }

    /// One member's score and rank in a scope.
    ///
    /// Degrades to `rank: None` instead of blocking if the index is
    /// contended past the read deadline.
    pub async fn standing(&self, scope: &Scope, member: MemberId) -> Option<MemberStanding> {
        let ranking = Arc::clone(&self.ranking);
        let scope_owned = scope.clone();
        let lookup = tokio::task::spawn_blocking(move || {
            let score = ranking.score_of(&scope_owned, member)?;
            let rank = ranking.rank_of(&scope_owned, member);
            Some((score, rank))
        });

        match tokio::time::timeout(self.config.read_timeout, lookup).await {
            Ok(Ok(Some((score, rank)))) => Some(MemberStanding {
                user_id: member,
                score,
                rank,
            }),
            Ok(Ok(None)) => None,
            _ => {
                warn!(%member, scope = %scope, "standing lookup timed out");
                self.ranking
                    .score_of(scope, member)
                    .map(|score| MemberStanding {
                        user_id: member,
                        score,
                        rank: None,
                    })
            }
        }
    }
}

/// Materialize one window directly from the ranking store.
fn compute_window(
    ranking: &RankingStore,
    scope: &Scope,
    skip: usize,
    limit: usize,
) -> Vec<LeaderboardRow> {
    // skip comes straight from client pagination; saturate instead of
    // overflowing on absurd offsets (the window is empty either way).
    ranking
        .range(scope, skip, skip.saturating_add(limit - 1), true)
        .into_iter()
        .enumerate()
        .map(|(offset, (user_id, score))| LeaderboardRow {
            user_id,
            score,
            rank: (skip + offset) as u64 + 1,
        })
        .collect()
}
