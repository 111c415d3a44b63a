//! Top-level script region

use std::sync::Arc;

use otterc_config::CompilationCacheConfig;
use tracing::trace;

use crate::compilation_cache::key::{CacheKey, LanguageMode, ScriptKey};
use crate::compilation_cache::origin::{ScriptDetails, has_origin};
use crate::compilation_cache::table::{CacheValue, TableSlot, is_stale};
use crate::error::HeapError;
use crate::memory::{Heap, HeapRef, RootVisitor};

/// Single-table cache for top-level scripts.
///
/// The key is (source, language mode) only. Provenance is checked after a
/// structural hit, so two scripts with equal text but different origins
/// share one slot and the later `put` wins.
#[derive(Debug)]
pub struct ScriptCacheRegion {
    table: TableSlot,
    ageing: bool,
}

impl ScriptCacheRegion {
    pub fn new(config: &CompilationCacheConfig) -> Self {
        Self {
            table: TableSlot::new(config.initial_table_capacity),
            ageing: config.script_cache_ageing,
        }
    }

    pub fn lookup(
        &self,
        heap: &Heap,
        source: &str,
        details: &ScriptDetails,
        language_mode: LanguageMode,
    ) -> Option<HeapRef> {
        let table = heap.table(self.table.get()?)?;
        let hash = ScriptKey::hash_of(source, language_mode);
        let index = table.find(hash, |key| {
            matches!(key, CacheKey::Script(key) if key.matches(source, language_mode))
        })?;
        let shared = table.entry(index)?.value.artifact()?;

        let script = heap.artifact(shared)?.script?;
        let script = heap.script(script)?;
        has_origin(script, details).then_some(shared)
    }

    pub fn put(
        &mut self,
        heap: &mut Heap,
        source: Arc<str>,
        language_mode: LanguageMode,
        artifact: HeapRef,
    ) -> Result<(), HeapError> {
        let key = CacheKey::Script(ScriptKey {
            source,
            language_mode,
        });
        self.table.put(heap, key, CacheValue::Artifact(artifact))
    }

    pub fn remove(&mut self, heap: &mut Heap, artifact: HeapRef) -> usize {
        self.table.remove_value(heap, artifact)
    }

    /// Drop entries whose bytecode went old; returns how many were removed
    pub fn age(&mut self, heap: &mut Heap) -> usize {
        if !self.ageing {
            return 0;
        }
        let Some(table) = self.table.get().and_then(|table| heap.table(table)) else {
            return 0;
        };

        let stale: Vec<usize> = table
            .iter()
            .filter(|(_, entry)| is_stale(heap, &entry.value))
            .map(|(index, _)| index)
            .collect();

        if let Some(table) = self.table.get().and_then(|table| heap.table_mut(table)) {
            for index in &stale {
                if let Some(entry) = table.remove_entry(*index) {
                    trace!(hash = entry.hash, "evicted stale script");
                }
            }
        }
        stale.len()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Artifact;

    fn compile(heap: &mut Heap, source: &str, details: &ScriptDetails) -> HeapRef {
        let script = heap.new_script(source, details).unwrap();
        heap.new_artifact(
            Artifact::new("toplevel", LanguageMode::Sloppy)
                .with_script(script)
                .with_bytecode(32),
        )
        .unwrap()
    }

    #[test]
    fn test_hit_requires_origin_match() {
        let mut heap = Heap::default();
        let mut region = ScriptCacheRegion::new(&CompilationCacheConfig::default());
        let a = ScriptDetails::named("a.js");
        let artifact = compile(&mut heap, "run()", &a);

        region
            .put(&mut heap, Arc::from("run()"), LanguageMode::Sloppy, artifact)
            .unwrap();

        assert_eq!(
            region.lookup(&heap, "run()", &a, LanguageMode::Sloppy),
            Some(artifact)
        );
        assert_eq!(
            region.lookup(&heap, "run()", &ScriptDetails::named("b.js"), LanguageMode::Sloppy),
            None
        );
        assert_eq!(region.lookup(&heap, "run()", &a, LanguageMode::Strict), None);
        assert_eq!(region.len(&heap), 1);
    }

    #[test]
    fn test_age_evicts_only_old_bytecode() {
        let mut heap = Heap::default();
        let mut region = ScriptCacheRegion::new(&CompilationCacheConfig::default());
        let details = ScriptDetails::default();
        let old = compile(&mut heap, "old()", &details);
        let fresh = compile(&mut heap, "fresh()", &details);
        let lazy_script = heap.new_script("lazy()", &details).unwrap();
        let lazy = heap
            .new_artifact(Artifact::new("lazy", LanguageMode::Sloppy).with_script(lazy_script))
            .unwrap();

        for (source, artifact) in [("old()", old), ("fresh()", fresh), ("lazy()", lazy)] {
            region
                .put(&mut heap, Arc::from(source), LanguageMode::Sloppy, artifact)
                .unwrap();
        }
        if let Some(bytecode) = heap.artifact_mut(old).unwrap().bytecode.as_mut() {
            bytecode.make_older();
        }

        assert_eq!(region.age(&mut heap), 1);
        assert!(region.lookup(&heap, "old()", &details, LanguageMode::Sloppy).is_none());
        assert!(region.lookup(&heap, "fresh()", &details, LanguageMode::Sloppy).is_some());
        assert!(region.lookup(&heap, "lazy()", &details, LanguageMode::Sloppy).is_some());
    }

    #[test]
    fn test_age_respects_config_switch() {
        let mut heap = Heap::default();
        let config = CompilationCacheConfig {
            script_cache_ageing: false,
            ..CompilationCacheConfig::default()
        };
        let mut region = ScriptCacheRegion::new(&config);
        let details = ScriptDetails::default();
        let artifact = compile(&mut heap, "x", &details);
        region
            .put(&mut heap, Arc::from("x"), LanguageMode::Sloppy, artifact)
            .unwrap();
        if let Some(bytecode) = heap.artifact_mut(artifact).unwrap().bytecode.as_mut() {
            bytecode.make_older();
        }

        assert_eq!(region.age(&mut heap), 0);
        assert!(region.lookup(&heap, "x", &details, LanguageMode::Sloppy).is_some());
    }
}
