//! Hit/miss counters for the compilation cache

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The four independently policied cache regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRegion {
    Script,
    EvalGlobal,
    EvalContextual,
    RegExp,
}

impl CacheRegion {
    pub const ALL: [CacheRegion; 4] = [
        CacheRegion::Script,
        CacheRegion::EvalGlobal,
        CacheRegion::EvalContextual,
        CacheRegion::RegExp,
    ];

    /// Tag used in logs and events
    pub fn name(self) -> &'static str {
        match self {
            CacheRegion::Script => "script",
            CacheRegion::EvalGlobal => "eval-global",
            CacheRegion::EvalContextual => "eval-contextual",
            CacheRegion::RegExp => "regexp",
        }
    }
}

impl fmt::Display for CacheRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hit and miss counts of one region
#[derive(Debug, Default)]
pub struct RegionCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegionCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Counters for every region of the compilation cache
#[derive(Debug, Default)]
pub struct CacheCounters {
    script: RegionCounters,
    eval_global: RegionCounters,
    eval_contextual: RegionCounters,
    regexp: RegionCounters,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self, region: CacheRegion) -> &RegionCounters {
        match region {
            CacheRegion::Script => &self.script,
            CacheRegion::EvalGlobal => &self.eval_global,
            CacheRegion::EvalContextual => &self.eval_contextual,
            CacheRegion::RegExp => &self.regexp,
        }
    }

    /// Record the outcome of a single lookup
    pub fn record_lookup(&self, region: CacheRegion, hit: bool) {
        let counters = self.region(region);
        if hit {
            counters.record_hit();
        } else {
            counters.record_miss();
        }
    }

    pub fn total_hits(&self) -> u64 {
        CacheRegion::ALL
            .iter()
            .map(|region| self.region(*region).hits())
            .sum()
    }

    pub fn total_misses(&self) -> u64 {
        CacheRegion::ALL
            .iter()
            .map(|region| self.region(*region).misses())
            .sum()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let mut snapshot = CounterSnapshot::default();
        for (index, region) in CacheRegion::ALL.iter().enumerate() {
            let counters = self.region(*region);
            snapshot.regions[index] = (counters.hits(), counters.misses());
        }
        snapshot
    }

    pub fn reset(&self) {
        for region in CacheRegion::ALL {
            self.region(region).reset();
        }
    }
}

/// Point-in-time copy of [`CacheCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    regions: [(u64, u64); 4],
}

impl CounterSnapshot {
    fn index(region: CacheRegion) -> usize {
        match region {
            CacheRegion::Script => 0,
            CacheRegion::EvalGlobal => 1,
            CacheRegion::EvalContextual => 2,
            CacheRegion::RegExp => 3,
        }
    }

    pub fn hits(&self, region: CacheRegion) -> u64 {
        self.regions[Self::index(region)].0
    }

    pub fn misses(&self, region: CacheRegion) -> u64 {
        self.regions[Self::index(region)].1
    }

    pub fn total_hits(&self) -> u64 {
        self.regions.iter().map(|(hits, _)| hits).sum()
    }

    pub fn total_misses(&self) -> u64 {
        self.regions.iter().map(|(_, misses)| misses).sum()
    }

    /// Hit rate over all regions in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits() + self.total_misses();
        if total == 0 {
            return 0.0;
        }
        (self.total_hits() as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup_touches_one_counter() {
        let counters = CacheCounters::new();
        counters.record_lookup(CacheRegion::Script, true);
        counters.record_lookup(CacheRegion::RegExp, false);
        counters.record_lookup(CacheRegion::RegExp, false);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.hits(CacheRegion::Script), 1);
        assert_eq!(snapshot.misses(CacheRegion::Script), 0);
        assert_eq!(snapshot.misses(CacheRegion::RegExp), 2);
        assert_eq!(snapshot.total_hits(), 1);
        assert_eq!(snapshot.total_misses(), 2);
        assert_eq!(counters.total_misses(), 2);
    }

    #[test]
    fn test_snapshot_indices_match_all_order() {
        let counters = CacheCounters::new();
        for (index, region) in CacheRegion::ALL.iter().enumerate() {
            for _ in 0..=index {
                counters.record_lookup(*region, true);
            }
        }
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.hits(CacheRegion::Script), 1);
        assert_eq!(snapshot.hits(CacheRegion::EvalGlobal), 2);
        assert_eq!(snapshot.hits(CacheRegion::EvalContextual), 3);
        assert_eq!(snapshot.hits(CacheRegion::RegExp), 4);
    }

    #[test]
    fn test_reset_and_hit_rate() {
        let counters = CacheCounters::new();
        assert_eq!(counters.snapshot().hit_rate(), 0.0);
        counters.record_lookup(CacheRegion::EvalGlobal, true);
        counters.record_lookup(CacheRegion::EvalGlobal, false);
        assert!((counters.snapshot().hit_rate() - 50.0).abs() < f64::EPSILON);
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }
}
