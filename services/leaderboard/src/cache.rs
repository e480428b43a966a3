//! Snapshot Cache: TTL'd ranked views with single-flight recompute
//!
//! Caches computed leaderboard windows keyed by (scope, skip, limit).
//! On a miss or expiry, exactly one caller runs the compute; every
//! concurrent caller for the same key waits on a `watch` channel and
//! receives the leader's result, errors included. An expired view is
//! never served.
//!
//! Invalidation is exact-key by scope: keys embed the same scope value
//! the update pipeline mutates, so busting a scope is a retain pass
//! over structured keys, not a pattern scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::debug;
use types::errors::LeaderboardError;
use types::scope::Scope;

use crate::events::LeaderboardRow;
use crate::metrics::ServiceMetrics;

/// Cache key: one pagination window of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKey {
    pub scope: Scope,
    pub skip: usize,
    pub limit: usize,
}

impl ViewKey {
    pub fn new(scope: Scope, skip: usize, limit: usize) -> Self {
        Self { scope, skip, limit }
    }
}

/// A computed, shareable leaderboard window.
pub type RankedView = Arc<Vec<LeaderboardRow>>;

type ComputeResult = Result<RankedView, LeaderboardError>;

enum Slot {
    /// A computed view, valid until `expires_at`.
    Ready {
        payload: RankedView,
        expires_at: Instant,
    },
    /// A compute is in flight; waiters share its outcome.
    Pending {
        rx: watch::Receiver<Option<ComputeResult>>,
    },
}

/// Time-bounded cache of computed ranked views.
pub struct SnapshotCache {
    slots: Mutex<HashMap<ViewKey, Slot>>,
    metrics: Arc<ServiceMetrics>,
}

impl SnapshotCache {
    pub fn new(metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Serve the cached view within its TTL, or compute it.
    ///
    /// Exactly one concurrent caller per key runs `compute`; the rest
    /// wait and receive the same result. If the leader is cancelled
    /// mid-compute, one waiter takes over as the new leader.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: ViewKey,
        ttl: Duration,
        compute: F,
    ) -> ComputeResult
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<LeaderboardRow>, LeaderboardError>>,
    {
        loop {
            let rx = {
                let mut slots = self.slots.lock().await;
                match slots.get(&key) {
                    Some(Slot::Ready {
                        payload,
                        expires_at,
                    }) if *expires_at > Instant::now() => {
                        ServiceMetrics::incr(&self.metrics.cache_hits);
                        return Ok(Arc::clone(payload));
                    }
                    Some(Slot::Pending { rx }) => Some(rx.clone()),
                    _ => {
                        // Stale or absent: this caller becomes the leader.
                        let (tx, rx) = watch::channel(None);
                        slots.insert(key.clone(), Slot::Pending { rx });
                        ServiceMetrics::incr(&self.metrics.cache_misses);
                        drop(slots);
                        return self.lead_compute(&key, ttl, compute, tx).await;
                    }
                }
            };

            if let Some(mut rx) = rx {
                loop {
                    let settled = rx.borrow().clone();
                    if let Some(result) = settled {
                        ServiceMetrics::incr(&self.metrics.cache_hits);
                        return result;
                    }
                    if rx.changed().await.is_err() {
                        // Leader was cancelled mid-compute. Clear the dead
                        // entry so the next pass can take over as leader; a
                        // fresh Pending inserted meanwhile has a live sender
                        // and is kept.
                        let mut slots = self.slots.lock().await;
                        let dead = matches!(
                            slots.get(&key),
                            Some(Slot::Pending { rx: current }) if current.has_changed().is_err()
                        );
                        if dead {
                            slots.remove(&key);
                        }
                        break;
                    }
                }
            }
        }
    }

    async fn lead_compute<F, Fut>(
        &self,
        key: &ViewKey,
        ttl: Duration,
        compute: F,
        tx: watch::Sender<Option<ComputeResult>>,
    ) -> ComputeResult
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<LeaderboardRow>, LeaderboardError>>,
    {
        let outcome = compute().await.map(Arc::new);

        let mut slots = self.slots.lock().await;
        match &outcome {
            Ok(payload) => {
                slots.insert(
                    key.clone(),
                    Slot::Ready {
                        payload: Arc::clone(payload),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
            Err(_) => {
                // Failures are not cached; the next caller recomputes.
                slots.remove(key);
            }
        }
        drop(slots);

        let _ = tx.send(Some(outcome.clone()));
        outcome
    }

    /// Drop every cached window of one scope.
    pub async fn invalidate_scope(&self, scope: &Scope) {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|key, _| &key.scope != scope);
        let removed = before - slots.len();
        if removed > 0 {
            ServiceMetrics::add(&self.metrics.cache_invalidations, removed as u64);
            debug!(scope = %scope, removed, "invalidated cached views");
        }
    }

    /// Drop one cached window.
    pub async fn invalidate_key(&self, key: &ViewKey) {
        if self.slots.lock().await.remove(key).is_some() {
            ServiceMetrics::incr(&self.metrics.cache_invalidations);
        }
    }

    /// Remove expired entries; pending slots are left alone.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::Pending { .. } => true,
        });
        before - slots.len()
    }

    /// Number of cached or in-flight entries.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use types::ids::{CategoryId, MemberId};

    fn cache() -> SnapshotCache {
        SnapshotCache::new(Arc::new(ServiceMetrics::new()))
    }

    fn key(skip: usize) -> ViewKey {
        ViewKey::new(Scope::Global, skip, 10)
    }

    fn rows(n: u64) -> Vec<LeaderboardRow> {
        (1..=n)
            .map(|i| LeaderboardRow {
                user_id: MemberId::new(i),
                score: 100 - i as i64,
                rank: i,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_miss_computes_then_hit_serves_cached() {
        let cache = cache();
        let computes = AtomicU64::new(0);

        for _ in 0..3 {
            let view = cache
                .get_or_compute(key(0), Duration::from_secs(300), || async {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(rows(3))
                })
                .await
                .unwrap();
            assert_eq!(view.len(), 3);
        }

        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_view_is_never_served() {
        let cache = cache();
        let computes = AtomicU64::new(0);
        let ttl = Duration::from_secs(300);

        let compute = || async {
            computes.fetch_add(1, Ordering::SeqCst);
            Ok(rows(1))
        };

        cache.get_or_compute(key(0), ttl, compute).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        cache.get_or_compute(key(0), ttl, compute).await.unwrap();

        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_flight_under_contention() {
        let cache = Arc::new(cache());
        let computes = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let computes = Arc::clone(&computes);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key(0), Duration::from_secs(300), || {
                        let computes = Arc::clone(&computes);
                        async move {
                            computes.fetch_add(1, Ordering::SeqCst);
                            // Give every waiter time to pile up.
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(rows(5))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut views = Vec::new();
        for handle in handles {
            views.push(handle.await.unwrap());
        }

        assert_eq!(computes.load(Ordering::SeqCst), 1);
        // Every caller observes the same payload.
        for view in &views {
            assert!(Arc::ptr_eq(view, &views[0]));
        }
    }

    #[tokio::test]
    async fn test_waiter_takes_over_after_cancelled_leader() {
        let cache = Arc::new(cache());

        let leader = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move {
                cache
                    .get_or_compute(key(0), Duration::from_secs(300), || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(rows(1))
                    })
                    .await
            }
        });
        // Let the leader claim the slot and park inside its compute.
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        // A later caller must not wait on the dead slot; it becomes the
        // new leader and computes.
        let view = tokio::time::timeout(
            Duration::from_secs(2),
            cache.get_or_compute(key(0), Duration::from_secs(300), || async { Ok(rows(2)) }),
        )
        .await
        .expect("caller must not hang on a cancelled leader's slot")
        .unwrap();
        assert_eq!(view.len(), 2);
    }

    #[tokio::test]
    async fn test_leader_error_is_shared_and_not_cached() {
        let cache = cache();
        let computes = AtomicU64::new(0);

        let err = cache
            .get_or_compute(key(0), Duration::from_secs(300), || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Err(LeaderboardError::transient("store offline"))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // A later caller recomputes.
        cache
            .get_or_compute(key(0), Duration::from_secs(300), || async { Ok(rows(1)) })
            .await
            .unwrap();
        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_scope_is_exact() {
        let cache = cache();
        let math = Scope::Category(CategoryId::new("math"));
        let compute = || async { Ok(rows(1)) };

        cache
            .get_or_compute(key(0), Duration::from_secs(300), compute)
            .await
            .unwrap();
        cache
            .get_or_compute(key(10), Duration::from_secs(300), compute)
            .await
            .unwrap();
        cache
            .get_or_compute(
                ViewKey::new(math.clone(), 0, 10),
                Duration::from_secs(300),
                compute,
            )
            .await
            .unwrap();

        cache.invalidate_scope(&Scope::Global).await;

        // Both global windows are gone; the math window survives.
        assert_eq!(cache.len().await, 1);
        cache.invalidate_scope(&math).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let cache = cache();
        cache
            .get_or_compute(key(0), Duration::from_secs(10), || async { Ok(rows(1)) })
            .await
            .unwrap();
        cache
            .get_or_compute(key(10), Duration::from_secs(1000), || async { Ok(rows(1)) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let removed = cache.sweep_expired().await;

        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }
}
