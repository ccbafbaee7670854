use crate::models::score::ScoreSnapshot;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheState {
    /// Every box of the catalog has a snapshot consistent with catalog + ledger
    Valid,
    /// Must be rebuilt before serving catalog-wide reads
    #[default]
    Invalid,
}

/// Memoized score snapshots.
///
/// Invariant: any entry present is consistent with the current catalog and
/// ledger, because every mutation removes the entries it affects. `Valid`
/// additionally means every box has an entry.
#[derive(Debug, Default)]
pub struct ScoreCache {
    state: CacheState,
    entries: HashMap<u32, ScoreSnapshot>,
}

impl ScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == CacheState::Valid
    }

    pub fn get(&self, box_id: u32) -> Option<&ScoreSnapshot> {
        self.entries.get(&box_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whole-cache drop: VALID → INVALID, no entries kept.
    pub fn invalidate_all(&mut self) {
        self.state = CacheState::Invalid;
        self.entries.clear();
    }

    /// Store a freshly computed snapshot for one box without changing the state.
    pub fn refresh_box(&mut self, box_id: u32, snapshot: ScoreSnapshot) {
        self.entries.insert(box_id, snapshot);
    }

    /// INVALID → VALID with a full set of snapshots.
    pub fn rebuild(&mut self, entries: HashMap<u32, ScoreSnapshot>) {
        self.entries = entries;
        self.state = CacheState::Valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(score: f64) -> ScoreSnapshot {
        ScoreSnapshot {
            fill_score: 0.0,
            urgency_score: 0.0,
            equity_score: 0.0,
            expected_fill: 0.0,
            profitability_score: score,
            days_since_last_visit: None,
        }
    }

    #[test]
    fn starts_invalid_and_empty() {
        let cache = ScoreCache::new();
        assert_eq!(cache.state(), CacheState::Invalid);
        assert!(cache.is_empty());
    }

    #[test]
    fn rebuild_then_invalidate_all() {
        let mut cache = ScoreCache::new();
        cache.rebuild(HashMap::from([(1, snapshot(10.0)), (2, snapshot(20.0))]));
        assert!(cache.is_valid());
        assert_eq!(cache.get(2).map(|s| s.profitability_score), Some(20.0));

        cache.invalidate_all();
        assert!(!cache.is_valid());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn targeted_refresh_after_whole_drop() {
        let mut cache = ScoreCache::new();
        cache.rebuild(HashMap::from([(1, snapshot(10.0)), (2, snapshot(20.0))]));

        cache.invalidate_all();
        cache.refresh_box(1, snapshot(99.0));

        assert_eq!(cache.state(), CacheState::Invalid);
        assert_eq!(cache.get(1).map(|s| s.profitability_score), Some(99.0));
        assert!(cache.get(2).is_none());
        assert_eq!(cache.len(), 1);
    }
}
