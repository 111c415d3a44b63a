//! Generational regular expression region

use std::sync::Arc;

use otterc_config::CompilationCacheConfig;
use tracing::warn;

use crate::compilation_cache::key::{CacheKey, RegExpFlags, RegExpKey};
use crate::compilation_cache::table::{CacheTable, CacheValue};
use crate::error::HeapError;
use crate::memory::{Heap, HeapRef, Root, RootVisitor};

/// Fixed array of generation tables, newest first.
///
/// Ageing is purely time based: every major collection shifts the tables one
/// slot older and drops the oldest, whatever it holds.
#[derive(Debug)]
pub struct RegExpCacheRegion {
    tables: Box<[Option<HeapRef>]>,
    initial_capacity: usize,
}

impl RegExpCacheRegion {
    pub fn new(config: &CompilationCacheConfig) -> Self {
        let generations = config.regexp_generations.max(2);
        Self {
            tables: vec![None; generations].into_boxed_slice(),
            initial_capacity: config.initial_table_capacity,
        }
    }

    pub fn generations(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, generation: usize) -> Option<HeapRef> {
        self.tables.get(generation).copied().flatten()
    }

    /// Probe generations newest to oldest.
    ///
    /// A hit in an older generation is copied into generation 0.
    pub fn lookup(&mut self, heap: &mut Heap, pattern: &str, flags: RegExpFlags) -> Option<HeapRef> {
        let hash = RegExpKey::hash_of(pattern, flags);
        let (generation, key, data) = self.tables.iter().enumerate().find_map(|(generation, table)| {
            let table = heap.table((*table)?)?;
            let index = table.find(hash, |key| {
                matches!(key, CacheKey::RegExp(key) if key.matches(pattern, flags))
            })?;
            let entry = table.entry(index)?;
            match (&entry.key, &entry.value) {
                (CacheKey::RegExp(key), CacheValue::RegExpData(data)) => {
                    Some((generation, Arc::clone(&key.pattern), *data))
                }
                _ => None,
            }
        })?;

        if generation > 0
            && let Err(error) = self.put(heap, key, flags, data)
        {
            warn!(generation, %error, "failed to promote cached regexp");
        }
        Some(data)
    }

    pub fn put(
        &mut self,
        heap: &mut Heap,
        pattern: Arc<str>,
        flags: RegExpFlags,
        data: HeapRef,
    ) -> Result<(), HeapError> {
        let table = match self.tables[0] {
            Some(table) => table,
            None => {
                let table = CacheTable::allocate(heap, self.initial_capacity)?;
                self.tables[0] = Some(table);
                table
            }
        };

        let key = CacheKey::RegExp(RegExpKey { pattern, flags });
        self.tables[0] = Some(CacheTable::put(
            heap,
            table,
            key,
            CacheValue::RegExpData(data),
        )?);
        Ok(())
    }

    pub fn age(&mut self) {
        self.tables.rotate_right(1);
        self.tables[0] = None;
    }

    pub fn clear(&mut self) {
        self.tables.fill(None);
    }

    pub fn iterate(&mut self, visitor: &mut dyn RootVisitor) {
        visitor.visit_roots(Root::CompilationCache, &mut self.tables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(generations: usize) -> RegExpCacheRegion {
        RegExpCacheRegion::new(&CompilationCacheConfig {
            regexp_generations: generations,
            ..CompilationCacheConfig::default()
        })
    }

    fn contains(heap: &Heap, table: Option<HeapRef>, pattern: &str, flags: RegExpFlags) -> bool {
        let key = CacheKey::RegExp(RegExpKey {
            pattern: Arc::from(pattern),
            flags,
        });
        table
            .and_then(|table| heap.table(table))
            .is_some_and(|table| table.find_key(&key).is_some())
    }

    #[test]
    fn test_generation_count_has_floor_of_two() {
        assert_eq!(region(0).generations(), 2);
        assert_eq!(region(5).generations(), 5);
    }

    #[test]
    fn test_age_rotates_and_promotion_refreshes() {
        let mut heap = Heap::default();
        let mut cache = region(2);
        let data = heap.new_regexp_data("a+", RegExpFlags::GLOBAL, vec![1, 2]).unwrap();

        cache.put(&mut heap, Arc::from("a+"), RegExpFlags::GLOBAL, data).unwrap();
        assert!(contains(&heap, cache.table(0), "a+", RegExpFlags::GLOBAL));

        cache.age();
        assert!(cache.table(0).is_none());
        assert!(contains(&heap, cache.table(1), "a+", RegExpFlags::GLOBAL));

        assert_eq!(cache.lookup(&mut heap, "a+", RegExpFlags::GLOBAL), Some(data));
        assert!(contains(&heap, cache.table(0), "a+", RegExpFlags::GLOBAL));
        assert!(contains(&heap, cache.table(1), "a+", RegExpFlags::GLOBAL));

        cache.age();
        cache.age();
        assert_eq!(cache.lookup(&mut heap, "a+", RegExpFlags::GLOBAL), None);
    }

    #[test]
    fn test_flags_are_part_of_the_key() {
        let mut heap = Heap::default();
        let mut cache = region(2);
        let global = heap.new_regexp_data("b", RegExpFlags::GLOBAL, Vec::new()).unwrap();
        let sticky = heap.new_regexp_data("b", RegExpFlags::STICKY, Vec::new()).unwrap();

        cache.put(&mut heap, Arc::from("b"), RegExpFlags::GLOBAL, global).unwrap();
        cache.put(&mut heap, Arc::from("b"), RegExpFlags::STICKY, sticky).unwrap();

        assert_eq!(cache.lookup(&mut heap, "b", RegExpFlags::GLOBAL), Some(global));
        assert_eq!(cache.lookup(&mut heap, "b", RegExpFlags::STICKY), Some(sticky));
        assert_eq!(cache.lookup(&mut heap, "b", RegExpFlags::empty()), None);
    }

    #[test]
    fn test_clear_empties_every_generation() {
        let mut heap = Heap::default();
        let mut cache = region(3);
        let data = heap.new_regexp_data("c", RegExpFlags::empty(), Vec::new()).unwrap();
        cache.put(&mut heap, Arc::from("c"), RegExpFlags::empty(), data).unwrap();
        cache.age();
        cache.put(&mut heap, Arc::from("c"), RegExpFlags::empty(), data).unwrap();

        cache.clear();
        assert!((0..cache.generations()).all(|generation| cache.table(generation).is_none()));
    }
}
