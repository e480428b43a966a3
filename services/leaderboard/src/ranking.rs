//! Ranking Store: per-scope sorted score index
//!
//! One shard per scope, each a `RwLock` over a score map plus a
//! `BTreeSet` ordered by (score descending, member id ascending). The
//! scope set is fixed at construction, so the shard map itself is
//! never mutated and needs no lock; concurrent increments to different
//! scopes never contend.
//!
//! Ordering contract: members with equal scores are ordered by lower
//! member id first, and `rank_of` is the 1-based position under that
//! total order, so `rank_of` and `range` always agree, ties included.
//!
//! The index is derived state. It must be rebuildable from the durable
//! per-member totals alone (`rebuild`), and is never a source of truth.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use tracing::debug;
use types::errors::{LeaderboardError, ValidationError};
use types::ids::{CategoryId, MemberId};
use types::scope::Scope;

/// Sort key: score descending, then member id ascending.
type RankKey = (Reverse<i64>, MemberId);

/// Sorted index for one scope.
#[derive(Debug, Default)]
struct ScopeIndex {
    /// Authoritative-as-of-last-commit score per member.
    scores: HashMap<MemberId, i64>,
    /// Rank ordering over all members in the scope.
    ordered: BTreeSet<RankKey>,
}

impl ScopeIndex {
    fn upsert(&mut self, member: MemberId, score: i64) {
        if let Some(old) = self.scores.insert(member, score) {
            self.ordered.remove(&(Reverse(old), member));
        }
        self.ordered.insert((Reverse(score), member));
    }

    fn remove(&mut self, member: MemberId) -> Option<i64> {
        let old = self.scores.remove(&member)?;
        self.ordered.remove(&(Reverse(old), member));
        Some(old)
    }

    fn rank_of(&self, member: MemberId) -> Option<u64> {
        let score = *self.scores.get(&member)?;
        let key = (Reverse(score), member);
        let position = self.ordered.range(..key).count() as u64;
        Some(position + 1)
    }
}

/// Per-scope sorted structure mapping member → score.
///
/// Supports atomic increment, rank lookup, and ranged reads under
/// concurrent callers. Reads on an unknown scope yield empty results;
/// mutations on an unknown scope are a caller contract violation.
pub struct RankingStore {
    shards: HashMap<Scope, RwLock<ScopeIndex>>,
}

impl RankingStore {
    /// Build a store for the global scope plus the given category set.
    pub fn new(categories: impl IntoIterator<Item = CategoryId>) -> Self {
        let mut shards = HashMap::new();
        shards.insert(Scope::Global, RwLock::new(ScopeIndex::default()));
        for category in categories {
            shards.insert(
                Scope::Category(category),
                RwLock::new(ScopeIndex::default()),
            );
        }
        Self { shards }
    }

    fn shard(&self, scope: &Scope) -> Result<&RwLock<ScopeIndex>, LeaderboardError> {
        self.shards.get(scope).ok_or_else(|| {
            ValidationError::UnknownScope {
                scope: scope.label(),
            }
            .into()
        })
    }

    /// Whether the scope exists in this store.
    pub fn has_scope(&self, scope: &Scope) -> bool {
        self.shards.contains_key(scope)
    }

    /// All configured scopes.
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.shards.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Atomically apply a signed delta and return the new score.
    ///
    /// The read-modify-write happens entirely under the shard's write
    /// lock, so concurrent increments to the same member never lose
    /// updates. Overflow is a contract violation, not a retry case.
    pub fn increment(
        &self,
        scope: &Scope,
        member: MemberId,
        delta: i64,
    ) -> Result<i64, LeaderboardError> {
        let shard = self.shard(scope)?;
        let mut index = shard.write().expect("ranking shard poisoned");

        let current = index.scores.get(&member).copied().unwrap_or(0);
        let new_score = current.checked_add(delta).ok_or_else(|| {
            LeaderboardError::from(ValidationError::InvalidDelta {
                member,
                reason: format!("score overflow: {} + {}", current, delta),
            })
        })?;

        index.upsert(member, new_score);
        debug!(scope = %scope, %member, delta, new_score, "applied score delta");
        Ok(new_score)
    }

    /// Overwrite a member's score, inserting the member if absent.
    pub fn set(
        &self,
        scope: &Scope,
        member: MemberId,
        score: i64,
    ) -> Result<(), LeaderboardError> {
        let shard = self.shard(scope)?;
        let mut index = shard.write().expect("ranking shard poisoned");
        index.upsert(member, score);
        Ok(())
    }

    /// Remove a member from a scope. No-op if absent or scope unknown.
    pub fn remove(&self, scope: &Scope, member: MemberId) -> Option<i64> {
        let shard = self.shards.get(scope)?;
        let mut index = shard.write().expect("ranking shard poisoned");
        index.remove(member)
    }

    /// Current score, None if the member is unranked or scope unknown.
    pub fn score_of(&self, scope: &Scope, member: MemberId) -> Option<i64> {
        let shard = self.shards.get(scope)?;
        let index = shard.read().expect("ranking shard poisoned");
        index.scores.get(&member).copied()
    }

    /// 1-based rank, None if the member is unranked or scope unknown.
    pub fn rank_of(&self, scope: &Scope, member: MemberId) -> Option<u64> {
        let shard = self.shards.get(scope)?;
        let index = shard.read().expect("ranking shard poisoned");
        index.rank_of(member)
    }

    /// Ranged read over the scope ordering, `start..=end` positions
    /// (0-based, inclusive, mirroring the sorted-set range the original
    /// read path used). `desc` walks best-first; `asc` worst-first.
    ///
    /// Unknown scope yields an empty result, not a failure.
    pub fn range(
        &self,
        scope: &Scope,
        start: usize,
        end: usize,
        desc: bool,
    ) -> Vec<(MemberId, i64)> {
        let Some(shard) = self.shards.get(scope) else {
            return Vec::new();
        };
        if end < start {
            return Vec::new();
        }
        let index = shard.read().expect("ranking shard poisoned");
        let take = end - start + 1;

        let project = |(Reverse(score), member): &RankKey| (*member, *score);
        if desc {
            index.ordered.iter().skip(start).take(take).map(project).collect()
        } else {
            index
                .ordered
                .iter()
                .rev()
                .skip(start)
                .take(take)
                .map(project)
                .collect()
        }
    }

    /// Number of ranked members in a scope (0 for unknown scopes).
    pub fn member_count(&self, scope: &Scope) -> usize {
        self.shards
            .get(scope)
            .map(|shard| shard.read().expect("ranking shard poisoned").scores.len())
            .unwrap_or(0)
    }

    /// Bulk-load a scope from durable totals, replacing its contents.
    ///
    /// Used to reconstruct the index after a restart; the durable
    /// per-member totals are the only source of truth.
    pub fn rebuild(
        &self,
        scope: &Scope,
        entries: impl IntoIterator<Item = (MemberId, i64)>,
    ) -> Result<usize, LeaderboardError> {
        let shard = self.shard(scope)?;
        let mut index = shard.write().expect("ranking shard poisoned");
        *index = ScopeIndex::default();
        let mut loaded = 0;
        for (member, score) in entries {
            index.upsert(member, score);
            loaded += 1;
        }
        debug!(scope = %scope, loaded, "rebuilt ranking index from durable totals");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store_with(categories: &[&str]) -> RankingStore {
        RankingStore::new(categories.iter().map(|c| CategoryId::new(*c)))
    }

    #[test]
    fn test_increment_from_zero() {
        let store = store_with(&[]);
        let score = store
            .increment(&Scope::Global, MemberId::new(1), 50)
            .unwrap();
        assert_eq!(score, 50);
    }

    #[test]
    fn test_increment_accumulates() {
        let store = store_with(&[]);
        let m = MemberId::new(1);
        store.increment(&Scope::Global, m, 50).unwrap();
        store.increment(&Scope::Global, m, -20).unwrap();
        let score = store.increment(&Scope::Global, m, 5).unwrap();
        assert_eq!(score, 35);
        assert_eq!(store.score_of(&Scope::Global, m), Some(35));
    }

    #[test]
    fn test_rank_after_delta() {
        // Scores {A:0, B:50, C:200}; +100 to A ⇒ A ranks 2nd.
        let store = store_with(&[]);
        let (a, b, c) = (MemberId::new(1), MemberId::new(2), MemberId::new(3));
        store.set(&Scope::Global, a, 0).unwrap();
        store.set(&Scope::Global, b, 50).unwrap();
        store.set(&Scope::Global, c, 200).unwrap();

        store.increment(&Scope::Global, a, 100).unwrap();

        assert_eq!(store.score_of(&Scope::Global, a), Some(100));
        assert_eq!(store.rank_of(&Scope::Global, a), Some(2));
        assert_eq!(store.rank_of(&Scope::Global, c), Some(1));
        assert_eq!(store.rank_of(&Scope::Global, b), Some(3));
    }

    #[test]
    fn test_tie_break_by_lower_member_id() {
        let store = store_with(&[]);
        let (a, b) = (MemberId::new(7), MemberId::new(3));
        store.set(&Scope::Global, a, 100).unwrap();
        store.set(&Scope::Global, b, 100).unwrap();

        // Same score: lower id ranks first.
        assert_eq!(store.rank_of(&Scope::Global, b), Some(1));
        assert_eq!(store.rank_of(&Scope::Global, a), Some(2));

        let range = store.range(&Scope::Global, 0, 9, true);
        assert_eq!(range, vec![(b, 100), (a, 100)]);
    }

    #[test]
    fn test_range_desc_and_asc() {
        let store = store_with(&[]);
        for (id, score) in [(1, 10), (2, 30), (3, 20)] {
            store.set(&Scope::Global, MemberId::new(id), score).unwrap();
        }

        let desc = store.range(&Scope::Global, 0, 2, true);
        assert_eq!(
            desc,
            vec![
                (MemberId::new(2), 30),
                (MemberId::new(3), 20),
                (MemberId::new(1), 10),
            ]
        );

        let asc = store.range(&Scope::Global, 0, 2, false);
        assert_eq!(asc[0], (MemberId::new(1), 10));
    }

    #[test]
    fn test_range_window() {
        let store = store_with(&[]);
        for id in 1..=10u64 {
            store
                .set(&Scope::Global, MemberId::new(id), 1000 - id as i64)
                .unwrap();
        }
        let window = store.range(&Scope::Global, 3, 5, true);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0], (MemberId::new(4), 996));
    }

    #[test]
    fn test_unknown_scope_reads_are_empty() {
        let store = store_with(&["math"]);
        let unknown = Scope::Category(CategoryId::new("chess"));

        assert!(store.range(&unknown, 0, 9, true).is_empty());
        assert_eq!(store.rank_of(&unknown, MemberId::new(1)), None);
        assert_eq!(store.member_count(&unknown), 0);
    }

    #[test]
    fn test_unknown_scope_mutation_fails() {
        let store = store_with(&["math"]);
        let unknown = Scope::Category(CategoryId::new("chess"));

        let err = store
            .increment(&unknown, MemberId::new(1), 10)
            .unwrap_err();
        assert!(matches!(
            err,
            LeaderboardError::Validation(ValidationError::UnknownScope { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_overflow_is_validation_error() {
        let store = store_with(&[]);
        let m = MemberId::new(1);
        store.set(&Scope::Global, m, i64::MAX).unwrap();
        let err = store.increment(&Scope::Global, m, 1).unwrap_err();
        assert!(matches!(
            err,
            LeaderboardError::Validation(ValidationError::InvalidDelta { .. })
        ));
        // The stored score is untouched.
        assert_eq!(store.score_of(&Scope::Global, m), Some(i64::MAX));
    }

    #[test]
    fn test_remove_member() {
        let store = store_with(&[]);
        let m = MemberId::new(1);
        store.set(&Scope::Global, m, 10).unwrap();
        assert_eq!(store.remove(&Scope::Global, m), Some(10));
        assert_eq!(store.rank_of(&Scope::Global, m), None);
        assert_eq!(store.remove(&Scope::Global, m), None);
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let store = store_with(&[]);
        store.set(&Scope::Global, MemberId::new(1), 999).unwrap();

        let loaded = store
            .rebuild(
                &Scope::Global,
                [(MemberId::new(2), 50), (MemberId::new(3), 70)],
            )
            .unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(store.score_of(&Scope::Global, MemberId::new(1)), None);
        assert_eq!(store.rank_of(&Scope::Global, MemberId::new(3)), Some(1));
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        use std::sync::Arc;

        let store = Arc::new(store_with(&[]));
        let m = MemberId::new(1);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    store.increment(&Scope::Global, m, 1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.score_of(&Scope::Global, m), Some(2000));
    }

    proptest! {
        /// rank_of(m) always equals m's 1-based position in the full
        /// descending range of its scope.
        #[test]
        fn prop_rank_agrees_with_range(scores in proptest::collection::btree_map(1u64..200, -1000i64..1000, 1..60)) {
            let store = store_with(&[]);
            for (&id, &score) in &scores {
                store.set(&Scope::Global, MemberId::new(id), score).unwrap();
            }

            let full = store.range(&Scope::Global, 0, scores.len() - 1, true);
            prop_assert_eq!(full.len(), scores.len());

            for (position, (member, _)) in full.iter().enumerate() {
                prop_assert_eq!(
                    store.rank_of(&Scope::Global, *member),
                    Some(position as u64 + 1)
                );
            }
        }
    }
}
