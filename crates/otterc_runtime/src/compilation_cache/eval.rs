//! Eval regions (global and contextual share this implementation)

use std::sync::Arc;

use otterc_config::CompilationCacheConfig;
use tracing::trace;

use crate::compilation_cache::key::{CacheKey, EvalKey, LanguageMode};
use crate::compilation_cache::table::{CacheTable, CacheValue, TableSlot, is_stale};
use crate::error::HeapError;
use crate::memory::{Heap, HeapRef, RootVisitor};

/// Artifact and feedback cell returned by an eval hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoCellPair {
    pub shared: HeapRef,
    pub feedback_cell: Option<HeapRef>,
}

/// What an eval `put` ended up storing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPut {
    Stored,
    /// First sighting; only a sentinel was recorded
    Seeded,
}

/// Single-table eval cache with countdown sentinels.
///
/// A sentinel is keyed by the bare hash of an eval key. It never answers a
/// lookup; a real entry with the same hash takes over its slot on `put`.
#[derive(Debug)]
pub struct EvalCacheRegion {
    table: TableSlot,
    hash_generations: u32,
    second_sighting: bool,
}

enum AgeAction {
    Remove(usize),
    CountDown(usize, u32),
}

impl EvalCacheRegion {
    pub fn new(config: &CompilationCacheConfig) -> Self {
        Self {
            table: TableSlot::new(config.initial_table_capacity),
            hash_generations: config.eval_hash_generations.max(1),
            second_sighting: config.eval_cache_second_sighting,
        }
    }

    pub fn lookup(
        &self,
        heap: &Heap,
        source: &str,
        outer_info: HeapRef,
        native_context: HeapRef,
        language_mode: LanguageMode,
        position: i32,
    ) -> Option<InfoCellPair> {
        let table = heap.table(self.table.get()?)?;
        let hash = EvalKey::hash_of(source, language_mode, position);
        let index = table.find(hash, |key| {
            matches!(key, CacheKey::Eval(key)
                if key.matches(source, outer_info, native_context, language_mode, position))
        })?;

        match table.entry(index)?.value {
            CacheValue::Eval {
                shared,
                feedback_cell,
            } => Some(InfoCellPair {
                shared,
                feedback_cell,
            }),
            _ => None,
        }
    }

    /// Cache `artifact` under its eval key.
    ///
    /// The language mode is taken from the artifact itself.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &mut self,
        heap: &mut Heap,
        source: Arc<str>,
        outer_info: HeapRef,
        native_context: HeapRef,
        artifact: HeapRef,
        feedback_cell: Option<HeapRef>,
        position: i32,
    ) -> Result<EvalPut, HeapError> {
        let language_mode = heap.try_artifact(artifact)?.language_mode;
        let key = CacheKey::Eval(EvalKey {
            source,
            outer_info,
            native_context,
            language_mode,
            position,
        });
        let hash = key.hash();
        let value = CacheValue::Eval {
            shared: artifact,
            feedback_cell,
        };

        let table = self.table.get_or_allocate(heap)?;
        let current = heap.try_table(table)?;
        if current.find_key(&key).is_none() {
            if let Some(index) = current.find_sentinel(hash) {
                heap.try_table_mut(table)?.replace_entry(index, key, value);
                return Ok(EvalPut::Stored);
            }
            if self.second_sighting {
                self.table.put(
                    heap,
                    CacheKey::Sentinel(hash),
                    CacheValue::Countdown(self.hash_generations),
                )?;
                return Ok(EvalPut::Seeded);
            }
        }

        self.table.put(heap, key, value)?;
        Ok(EvalPut::Stored)
    }

    /// Record a sentinel for `hash` that survives `count` major collections
    pub fn seed_sentinel(&mut self, heap: &mut Heap, hash: u32, count: u32) -> Result<(), HeapError> {
        self.table
            .put(heap, CacheKey::Sentinel(hash), CacheValue::Countdown(count))
    }

    pub fn sentinel_count(&self, heap: &Heap, hash: u32) -> Option<u32> {
        let table = heap.table(self.table.get()?)?;
        match table.entry(table.find_sentinel(hash)?)?.value {
            CacheValue::Countdown(count) => Some(count),
            _ => None,
        }
    }

    pub fn hash_generations(&self) -> u32 {
        self.hash_generations
    }

    pub fn remove(&mut self, heap: &mut Heap, artifact: HeapRef) -> usize {
        self.table.remove_value(heap, artifact)
    }

    /// Count sentinels down and drop entries whose bytecode went old.
    ///
    /// Returns the number of entries removed.
    pub fn age(&mut self, heap: &mut Heap) -> usize {
        let Some(table) = self.table.get().and_then(|table| heap.table(table)) else {
            return 0;
        };

        let actions: Vec<AgeAction> = table
            .iter()
            .filter_map(|(index, entry)| match entry.value {
                CacheValue::Countdown(count) if count <= 1 => Some(AgeAction::Remove(index)),
                CacheValue::Countdown(count) => Some(AgeAction::CountDown(index, count - 1)),
                _ if is_stale(heap, &entry.value) => Some(AgeAction::Remove(index)),
                _ => None,
            })
            .collect();

        let Some(table) = self.table.get().and_then(|table| heap.table_mut(table)) else {
            return 0;
        };
        apply(table, actions)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn iterate(&mut self, visitor: &mut dyn RootVisitor) {
        self.table.iterate(visitor);
    }

    pub fn table(&self) -> Option<HeapRef> {
        self.table.get()
    }

    pub fn len(&self, heap: &Heap) -> usize {
        self.table.len(heap)
    }
}

fn apply(table: &mut CacheTable, actions: Vec<AgeAction>) -> usize {
    let mut removed = 0;
    for action in actions {
        match action {
            AgeAction::Remove(index) => {
                if let Some(entry) = table.remove_entry(index) {
                    trace!(hash = entry.hash, sentinel = entry.key.is_sentinel(), "evicted eval entry");
                    removed += 1;
                }
            }
            AgeAction::CountDown(index, count) => {
                table.set_value(index, CacheValue::Countdown(count));
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Artifact;

    struct Fixture {
        heap: Heap,
        outer: HeapRef,
        native: HeapRef,
    }

    impl Fixture {
        fn new() -> Self {
            let mut heap = Heap::default();
            let native = heap.new_native_context().unwrap();
            let outer = heap
                .new_artifact(Artifact::new("outer", LanguageMode::Sloppy).with_bytecode(8))
                .unwrap();
            Self {
                heap,
                outer,
                native,
            }
        }

        fn compile(&mut self, mode: LanguageMode) -> HeapRef {
            self.heap
                .new_artifact(Artifact::new("eval", mode).with_bytecode(8))
                .unwrap()
        }
    }

    #[test]
    fn test_lookup_matches_every_key_part() {
        let mut fx = Fixture::new();
        let mut region = EvalCacheRegion::new(&CompilationCacheConfig::default());
        let artifact = fx.compile(LanguageMode::Strict);
        let cell = fx.heap.new_feedback_cell().unwrap();

        let outcome = region
            .put(&mut fx.heap, Arc::from("x + 1"), fx.outer, fx.native, artifact, Some(cell), 4)
            .unwrap();
        assert_eq!(outcome, EvalPut::Stored);

        let hit = region.lookup(&fx.heap, "x + 1", fx.outer, fx.native, LanguageMode::Strict, 4);
        assert_eq!(
            hit,
            Some(InfoCellPair {
                shared: artifact,
                feedback_cell: Some(cell)
            })
        );

        let other_native = fx.heap.new_native_context().unwrap();
        assert!(region
            .lookup(&fx.heap, "x + 1", fx.outer, other_native, LanguageMode::Strict, 4)
            .is_none());
        assert!(region
            .lookup(&fx.heap, "x + 1", fx.outer, fx.native, LanguageMode::Sloppy, 4)
            .is_none());
        assert!(region
            .lookup(&fx.heap, "x + 1", fx.outer, fx.native, LanguageMode::Strict, 5)
            .is_none());
    }

    #[test]
    fn test_sentinel_counts_down_and_expires() {
        let mut fx = Fixture::new();
        let mut region = EvalCacheRegion::new(&CompilationCacheConfig::default());
        let hash = EvalKey::hash_of("y", LanguageMode::Sloppy, 0);

        region.seed_sentinel(&mut fx.heap, hash, 3).unwrap();
        assert_eq!(region.sentinel_count(&fx.heap, hash), Some(3));

        region.age(&mut fx.heap);
        assert_eq!(region.sentinel_count(&fx.heap, hash), Some(2));
        region.age(&mut fx.heap);
        assert_eq!(region.sentinel_count(&fx.heap, hash), Some(1));
        assert_eq!(region.age(&mut fx.heap), 1);
        assert_eq!(region.sentinel_count(&fx.heap, hash), None);
    }

    #[test]
    fn test_sentinel_never_answers_lookup_and_is_taken_over() {
        let mut fx = Fixture::new();
        let mut region = EvalCacheRegion::new(&CompilationCacheConfig::default());
        let hash = EvalKey::hash_of("z", LanguageMode::Sloppy, 2);
        region.seed_sentinel(&mut fx.heap, hash, 5).unwrap();

        assert!(region
            .lookup(&fx.heap, "z", fx.outer, fx.native, LanguageMode::Sloppy, 2)
            .is_none());

        let artifact = fx.compile(LanguageMode::Sloppy);
        region
            .put(&mut fx.heap, Arc::from("z"), fx.outer, fx.native, artifact, None, 2)
            .unwrap();

        assert_eq!(region.sentinel_count(&fx.heap, hash), None);
        assert_eq!(region.len(&fx.heap), 1);
        assert!(region
            .lookup(&fx.heap, "z", fx.outer, fx.native, LanguageMode::Sloppy, 2)
            .is_some());
    }

    #[test]
    fn test_second_sighting_defers_caching() {
        let mut fx = Fixture::new();
        let config = CompilationCacheConfig {
            eval_cache_second_sighting: true,
            eval_hash_generations: 4,
            ..CompilationCacheConfig::default()
        };
        let mut region = EvalCacheRegion::new(&config);
        let artifact = fx.compile(LanguageMode::Sloppy);
        let hash = EvalKey::hash_of("once", LanguageMode::Sloppy, 0);

        let first = region
            .put(&mut fx.heap, Arc::from("once"), fx.outer, fx.native, artifact, None, 0)
            .unwrap();
        assert_eq!(first, EvalPut::Seeded);
        assert_eq!(region.sentinel_count(&fx.heap, hash), Some(4));
        assert!(region
            .lookup(&fx.heap, "once", fx.outer, fx.native, LanguageMode::Sloppy, 0)
            .is_none());

        let second = region
            .put(&mut fx.heap, Arc::from("once"), fx.outer, fx.native, artifact, None, 0)
            .unwrap();
        assert_eq!(second, EvalPut::Stored);
        assert!(region
            .lookup(&fx.heap, "once", fx.outer, fx.native, LanguageMode::Sloppy, 0)
            .is_some());
    }

    #[test]
    fn test_age_drops_old_bytecode_but_keeps_lazy_artifacts() {
        let mut fx = Fixture::new();
        let mut region = EvalCacheRegion::new(&CompilationCacheConfig::default());
        let old = fx.compile(LanguageMode::Sloppy);
        let lazy = fx
            .heap
            .new_artifact(Artifact::new("lazy", LanguageMode::Sloppy))
            .unwrap();

        region
            .put(&mut fx.heap, Arc::from("a"), fx.outer, fx.native, old, None, 1)
            .unwrap();
        region
            .put(&mut fx.heap, Arc::from("b"), fx.outer, fx.native, lazy, None, 1)
            .unwrap();
        if let Some(bytecode) = fx.heap.artifact_mut(old).unwrap().bytecode.as_mut() {
            bytecode.make_older();
        }

        assert_eq!(region.age(&mut fx.heap), 1);
        assert!(region
            .lookup(&fx.heap, "a", fx.outer, fx.native, LanguageMode::Sloppy, 1)
            .is_none());
        assert!(region
            .lookup(&fx.heap, "b", fx.outer, fx.native, LanguageMode::Sloppy, 1)
            .is_some());
    }
}
