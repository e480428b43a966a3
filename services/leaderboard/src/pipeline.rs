//! Update Pipeline: durable commit → index → cache → rank → publish
//!
//! The only write path into the ranking core. Ordering is strict:
//! nothing observable happens until the durable collaborator has
//! committed the delta. A commit failure aborts the whole operation
//! with no partial effect. Failures *after* the commit never unwind
//! it; they are re-driven by a supervised background repair task with
//! a bounded attempt budget, accepting temporary index staleness over
//! ever losing an authoritative update.
//!
//! Same-member increments serialize at the durable layer; cross-member
//! increments need no ordering at all.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use types::errors::{LeaderboardError, ValidationError};
use types::ids::{CategoryId, MemberId};
use types::scope::Scope;

use crate::broadcast::FanoutBroadcaster;
use crate::cache::SnapshotCache;
use crate::events::RankingEvent;
use crate::metrics::ServiceMetrics;
use crate::ranking::RankingStore;

/// Durable score collaborator. Owns the authoritative per-member
/// totals; everything in this crate is derived from them.
#[async_trait]
pub trait ScoreStore: Send + Sync + 'static {
    /// Atomically add `points` to the member's durable totals for the
    /// global scope and, if given, the category scope. Serializes
    /// concurrent commits for the same member.
    async fn commit_delta(
        &self,
        member: MemberId,
        points: i64,
        category: Option<&CategoryId>,
    ) -> Result<CommittedTotals, LeaderboardError>;

    /// Read every durable total of one scope, for index rebuilds.
    async fn load_scope(
        &self,
        scope: &Scope,
    ) -> Result<Vec<(MemberId, i64)>, LeaderboardError>;
}

/// Post-commit durable totals returned by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedTotals {
    pub global_total: i64,
    pub category_total: Option<i64>,
}

/// Bounded exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `n + 1` (`n` is the number of failures so
    /// far, starting at 1). Doubles each failure, capped.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exp);
        delay.min(self.max_backoff)
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Retry budget for the durable commit (step 1).
    pub commit_retry: RetryPolicy,
    /// Retry budget for the post-commit repair task (steps 2–5).
    pub repair_retry: RetryPolicy,
    /// Rank reads degrade to "rank unknown" past this deadline.
    pub rank_read_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            commit_retry: RetryPolicy {
                max_attempts: 4,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_secs(1),
            },
            repair_retry: RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(5),
            },
            rank_read_timeout: Duration::from_millis(50),
        }
    }
}

/// Per-scope result of a delta application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeOutcome {
    pub scope: Scope,
    /// Index score after the increment.
    pub new_score: i64,
    /// 1-based rank, None when the lookup degraded.
    pub new_rank: Option<u64>,
}

/// Result returned to the delta submitter.
///
/// `deferred` lists scopes whose index propagation failed after the
/// durable commit and was handed to the background repair task; the
/// commit itself is final either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub member: MemberId,
    pub scopes: Vec<ScopeOutcome>,
    pub deferred: Vec<Scope>,
}

/// Where a post-commit propagation pass picks up from.
#[derive(Debug, Clone, Copy)]
enum PropagationStage {
    /// The index increment has not been applied yet.
    Apply { points: i64 },
    /// The increment is applied; invalidation/rank/publish remain.
    Publish { new_score: i64 },
}

/// Orchestrates score delta application end to end.
pub struct UpdatePipeline {
    store: Arc<dyn ScoreStore>,
    ranking: Arc<RankingStore>,
    cache: Arc<SnapshotCache>,
    broadcaster: Arc<FanoutBroadcaster>,
    metrics: Arc<ServiceMetrics>,
    config: PipelineConfig,
}

impl UpdatePipeline {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        ranking: Arc<RankingStore>,
        cache: Arc<SnapshotCache>,
        broadcaster: Arc<FanoutBroadcaster>,
        metrics: Arc<ServiceMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            ranking,
            cache,
            broadcaster,
            metrics,
            config,
        }
    }

    /// Apply a signed point delta to a member, optionally scoped to a
    /// category as well as the global board.
    ///
    /// The caller is told success as soon as the durable commit
    /// succeeds, even if live propagation lags behind.
    pub async fn apply_score_delta(
        self: &Arc<Self>,
        member: MemberId,
        points: i64,
        category: Option<CategoryId>,
    ) -> Result<DeltaOutcome, LeaderboardError> {
        // Reject contract violations before touching the durable layer.
        if let Some(cat) = &category {
            let scope = Scope::Category(cat.clone());
            if !self.ranking.has_scope(&scope) {
                ServiceMetrics::incr(&self.metrics.deltas_rejected);
                return Err(ValidationError::UnknownCategory {
                    category: cat.to_string(),
                }
                .into());
            }
        }

        // Step 1: durable commit. Failure here leaves no trace.
        let totals = self.commit_with_retry(member, points, category.as_ref()).await?;
        ServiceMetrics::incr(&self.metrics.deltas_applied);
        debug!(
            %member,
            points,
            global_total = totals.global_total,
            "durable commit succeeded"
        );

        // Steps 2–5 per affected scope.
        let mut affected = vec![Scope::Global];
        if let Some(cat) = category {
            affected.push(Scope::Category(cat));
        }

        let timestamp = unix_nanos_now();
        let mut outcome = DeltaOutcome {
            member,
            scopes: Vec::with_capacity(affected.len()),
            deferred: Vec::new(),
        };

        for scope in affected {
            let stage = PropagationStage::Apply { points };
            match self.propagate(&scope, member, stage, timestamp).await {
                Ok(Some(scope_outcome)) => outcome.scopes.push(scope_outcome),
                Ok(None) => {}
                Err((failed_stage, err)) => {
                    warn!(
                        scope = %scope,
                        %member,
                        %err,
                        "post-commit propagation failed, scheduling repair"
                    );
                    outcome.deferred.push(scope.clone());
                    self.schedule_repair(scope, member, failed_stage, timestamp);
                }
            }
        }

        Ok(outcome)
    }

    /// Rebuild every configured scope's index from the durable totals.
    /// The index is derived state; this is the restart path.
    pub async fn rebuild_indexes(&self) -> Result<usize, LeaderboardError> {
        let mut total = 0;
        for scope in self.ranking.scopes() {
            let entries = self.store.load_scope(&scope).await?;
            total += self.ranking.rebuild(&scope, entries)?;
            self.cache.invalidate_scope(&scope).await;
        }
        info!(members_loaded = total, "ranking indexes rebuilt from durable totals");
        Ok(total)
    }

    async fn commit_with_retry(
        &self,
        member: MemberId,
        points: i64,
        category: Option<&CategoryId>,
    ) -> Result<CommittedTotals, LeaderboardError> {
        let policy = &self.config.commit_retry;
        let mut failures = 0u32;
        loop {
            match self.store.commit_delta(member, points, category).await {
                Ok(totals) => return Ok(totals),
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures >= policy.max_attempts {
                        ServiceMetrics::incr(&self.metrics.deltas_rejected);
                        return Err(LeaderboardError::CommitExhausted {
                            attempts: failures,
                            reason: err.to_string(),
                        });
                    }
                    ServiceMetrics::incr(&self.metrics.commit_retries);
                    let delay = policy.backoff_after(failures);
                    warn!(
                        %member,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "durable commit failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    ServiceMetrics::incr(&self.metrics.deltas_rejected);
                    return Err(err);
                }
            }
        }
    }

    /// Run steps 2–5 for one scope from the given stage.
    ///
    /// Returns Ok(None) when the increment itself was rejected as a
    /// contract violation (nothing left to repair). Transient failures
    /// come back with the stage they failed at, so a retry resumes
    /// there and the commutative increment is never applied twice.
    async fn propagate(
        &self,
        scope: &Scope,
        member: MemberId,
        stage: PropagationStage,
        timestamp: i64,
    ) -> Result<Option<ScopeOutcome>, (PropagationStage, LeaderboardError)> {
        let new_score = match stage {
            PropagationStage::Apply { points } => {
                match self.ranking.increment(scope, member, points) {
                    Ok(score) => score,
                    Err(err @ LeaderboardError::Validation(_)) => {
                        // Committed durably but inexpressible in the index
                        // (e.g. overflow). Not repairable; surface loudly.
                        error!(scope = %scope, %member, %err, "index rejected committed delta");
                        return Ok(None);
                    }
                    Err(err) => return Err((stage, err)),
                }
            }
            PropagationStage::Publish { new_score } => new_score,
        };

        // Step 3: exact-key invalidation for the mutated scope.
        self.cache.invalidate_scope(scope).await;

        // Step 4: rank recomputation, degrading to "rank unknown".
        let new_rank = self.rank_with_timeout(scope, member).await;

        // Step 5: event publication.
        let event = RankingEvent::for_scope(scope.clone(), member, new_score, new_rank, timestamp);
        self.broadcaster
            .deliver(&event.channel(), &event)
            .map_err(|err| (PropagationStage::Publish { new_score }, err))?;

        Ok(Some(ScopeOutcome {
            scope: scope.clone(),
            new_score,
            new_rank,
        }))
    }

    async fn rank_with_timeout(&self, scope: &Scope, member: MemberId) -> Option<u64> {
        let ranking = Arc::clone(&self.ranking);
        let scope = scope.clone();
        let lookup = tokio::task::spawn_blocking(move || ranking.rank_of(&scope, member));
        match tokio::time::timeout(self.config.rank_read_timeout, lookup).await {
            Ok(Ok(rank)) => rank,
            _ => {
                warn!(%member, "rank lookup timed out, publishing rank unknown");
                None
            }
        }
    }

    /// Supervise retries of a failed post-commit propagation. The task
    /// owns an explicit attempt budget and ends in an observable
    /// terminal state either way.
    fn schedule_repair(
        self: &Arc<Self>,
        scope: Scope,
        member: MemberId,
        stage: PropagationStage,
        timestamp: i64,
    ) {
        ServiceMetrics::incr(&self.metrics.repairs_scheduled);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let policy = pipeline.config.repair_retry.clone();
            let mut stage = stage;
            for attempt in 1..=policy.max_attempts {
                tokio::time::sleep(policy.backoff_after(attempt)).await;
                match pipeline.propagate(&scope, member, stage, timestamp).await {
                    Ok(_) => {
                        info!(scope = %scope, %member, attempt, "propagation repaired");
                        return;
                    }
                    Err((failed_stage, err)) => {
                        stage = failed_stage;
                        warn!(scope = %scope, %member, attempt, %err, "repair attempt failed");
                    }
                }
            }
            ServiceMetrics::incr(&pipeline.metrics.repairs_abandoned);
            error!(
                scope = %scope,
                %member,
                attempts = policy.max_attempts,
                "propagation repair abandoned; index stale until next rebuild"
            );
        });
    }
}

/// Current wall-clock time as Unix nanoseconds.
pub fn unix_nanos_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
