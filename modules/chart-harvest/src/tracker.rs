use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::types::{DedupKey, Entry};

/// Per-harvest bookkeeping. Built fresh for every list and dropped when the
/// harvest ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestState {
    seen_by_id: HashMap<DedupKey, Entry>,
    seen_by_rank: BTreeMap<u32, Entry>,
    pub consecutive_stale_count: u32,
    pub consecutive_no_progress_count: u32,
    pub scroll_attempts: u32,
}

/// Counts from merging one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// New keys recorded.
    pub accepted: usize,
    /// Known keys moved to a lower rank.
    pub moved: usize,
    /// Known keys seen again at the same or a higher rank.
    pub duplicates: usize,
    /// Candidates whose rank is held by a different key.
    pub conflicts: usize,
}

impl MergeOutcome {
    pub fn made_progress(&self) -> bool {
        self.accepted > 0
    }
}

enum Decision {
    Accepted,
    Moved,
    Duplicate,
    Conflict,
}

impl HarvestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one pass of candidates into the state.
    pub fn merge(&mut self, candidates: &[Entry]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for candidate in candidates {
            match self.merge_one(candidate) {
                Decision::Accepted => outcome.accepted += 1,
                Decision::Moved => outcome.moved += 1,
                Decision::Duplicate => outcome.duplicates += 1,
                Decision::Conflict => outcome.conflicts += 1,
            }
        }
        outcome
    }

    fn merge_one(&mut self, candidate: &Entry) -> Decision {
        let key = candidate.dedup_key();
        let rank = candidate.rank;

        if let Some(occupant) = self.seen_by_rank.get(&rank) {
            if occupant.dedup_key() != key {
                debug!(rank, "Rank already held by a different entry");
                return Decision::Conflict;
            }
        }

        match self.seen_by_id.get(&key).map(|e| e.rank) {
            Some(previous) if rank >= previous => Decision::Duplicate,
            Some(previous) => {
                // Re-rendered at a shifted rank while settling: the lower rank wins.
                if self
                    .seen_by_rank
                    .get(&previous)
                    .is_some_and(|e| e.dedup_key() == key)
                {
                    self.seen_by_rank.remove(&previous);
                }
                debug!(from = previous, to = rank, "Entry moved to lower rank");
                self.record(key, candidate);
                Decision::Moved
            }
            None => {
                self.record(key, candidate);
                Decision::Accepted
            }
        }
    }

    fn record(&mut self, key: DedupKey, entry: &Entry) {
        self.seen_by_rank.insert(entry.rank, entry.clone());
        self.seen_by_id.insert(key, entry.clone());
    }

    /// Largest `k` such that ranks `1..=k` are all present.
    pub fn contiguous_len(&self) -> u32 {
        let mut expected = 1;
        for &rank in self.seen_by_rank.keys() {
            if rank != expected {
                break;
            }
            expected += 1;
        }
        expected - 1
    }

    pub fn is_complete(&self, target_count: u32) -> bool {
        self.contiguous_len() >= target_count
    }

    /// Ranks `1..=min(contiguous_len, target_count)` in order. Anything past
    /// the target, or after the first gap, is left out.
    pub fn ordered_result(&self, target_count: u32) -> Vec<Entry> {
        let end = self.contiguous_len().min(target_count);
        self.seen_by_rank
            .range(1..=end)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn entry_at(&self, rank: u32) -> Option<&Entry> {
        self.seen_by_rank.get(&rank)
    }

    /// Distinct ranks recorded, including any past the target.
    pub fn rank_count(&self) -> usize {
        self.seen_by_rank.len()
    }

    pub fn highest_rank(&self) -> Option<u32> {
        self.seen_by_rank.keys().next_back().copied()
    }
}
