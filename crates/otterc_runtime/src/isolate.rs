//! An isolated runtime instance: heap, collector, compilation cache and the
//! persistent handles the embedder holds into the heap.

use tracing::info;

use crate::compilation_cache::{AgeReport, CompilationCache};
use crate::config::RuntimeConfig;
use crate::error::HeapError;
use crate::memory::{GcStats, Heap, HeapRef, MarkCompactCollector, Root, RootVisitor, Roots};

/// Index of a persistent handle slot.
///
/// The slot is rewritten by every compaction, so the handle keeps naming the
/// same object while its [`HeapRef`] changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Persistent(usize);

/// Outcome of one major collection
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub aged: AgeReport,
    pub gc: GcStats,
}

pub struct Isolate {
    heap: Heap,
    collector: MarkCompactCollector,
    compilation_cache: CompilationCache,
    handles: Vec<Option<HeapRef>>,
    free_handles: Vec<usize>,
    native_context: HeapRef,
}

struct IsolateRoots<'a> {
    compilation_cache: &'a mut CompilationCache,
    handles: &'a mut [Option<HeapRef>],
    native_context: &'a mut HeapRef,
}

impl Roots for IsolateRoots<'_> {
    fn iterate_roots(&mut self, visitor: &mut dyn RootVisitor) {
        self.compilation_cache.iterate(visitor);
        visitor.visit_root(Root::Handles, self.native_context);
        visitor.visit_roots(Root::Handles, self.handles);
    }
}

impl Isolate {
    /// Build an isolate with a fresh native context
    pub fn new(config: &RuntimeConfig) -> Result<Self, HeapError> {
        let mut heap = Heap::new(&config.gc);
        let native_context = heap.new_native_context()?;

        info!(
            max_heap = config.gc.max_heap_size,
            cache_enabled = config.compilation_cache.enabled,
            regexp_generations = config.compilation_cache.regexp_generations,
            "isolate created"
        );

        Ok(Self {
            heap,
            collector: MarkCompactCollector::new(config.gc.clone()),
            compilation_cache: CompilationCache::new(
                config.compilation_cache.clone(),
                config.instrumentation.clone(),
            ),
            handles: Vec::new(),
            free_handles: Vec::new(),
            native_context,
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn compilation_cache(&self) -> &CompilationCache {
        &self.compilation_cache
    }

    pub fn compilation_cache_mut(&mut self) -> &mut CompilationCache {
        &mut self.compilation_cache
    }

    /// Heap and cache borrowed together, as every cache operation needs
    pub fn parts_mut(&mut self) -> (&mut Heap, &mut CompilationCache) {
        (&mut self.heap, &mut self.compilation_cache)
    }

    /// Current handle of the isolate's native context
    pub fn native_context(&self) -> HeapRef {
        self.native_context
    }

    /// Keep `reference` alive and up to date across collections
    pub fn persist(&mut self, reference: HeapRef) -> Persistent {
        match self.free_handles.pop() {
            Some(index) => {
                self.handles[index] = Some(reference);
                Persistent(index)
            }
            None => {
                self.handles.push(Some(reference));
                Persistent(self.handles.len() - 1)
            }
        }
    }

    pub fn get(&self, handle: Persistent) -> Option<HeapRef> {
        self.handles.get(handle.0).copied().flatten()
    }

    pub fn release(&mut self, handle: Persistent) {
        if let Some(slot) = self.handles.get_mut(handle.0)
            && slot.take().is_some()
        {
            self.free_handles.push(handle.0);
        }
    }

    /// Major collection: age the compilation cache, then mark and compact
    pub fn collect_garbage(&mut self) -> CollectionReport {
        let aged = self.compilation_cache.mark_compact_prologue(&mut self.heap);

        let mut roots = IsolateRoots {
            compilation_cache: &mut self.compilation_cache,
            handles: &mut self.handles,
            native_context: &mut self.native_context,
        };
        let gc = self.collector.collect(&mut self.heap, &mut roots);

        CollectionReport { aged, gc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation_cache::LanguageMode;
    use crate::memory::{Artifact, FeedbackCell, HeapObject};

    #[test]
    fn test_native_context_survives_collection() {
        let mut isolate = Isolate::new(&RuntimeConfig::default()).unwrap();
        let id = isolate.heap().id_of(isolate.native_context()).unwrap();

        isolate
            .heap_mut()
            .allocate(HeapObject::FeedbackCell(FeedbackCell::default()))
            .unwrap();
        let report = isolate.collect_garbage();

        assert_eq!(report.gc.objects_collected, 1);
        assert_eq!(isolate.heap().id_of(isolate.native_context()), Some(id));
        assert!(isolate
            .heap()
            .context(isolate.native_context())
            .unwrap()
            .is_native_context());
    }

    #[test]
    fn test_persistent_handles_follow_relocation() {
        let mut isolate = Isolate::new(&RuntimeConfig::default()).unwrap();
        let heap = isolate.heap_mut();
        let _garbage = heap.new_feedback_cell().unwrap();
        let artifact = heap
            .new_artifact(Artifact::new("kept", LanguageMode::Sloppy))
            .unwrap();
        let id = heap.id_of(artifact).unwrap();

        let handle = isolate.persist(artifact);
        isolate.collect_garbage();

        let moved = isolate.get(handle).unwrap();
        assert_ne!(moved, artifact);
        assert_eq!(isolate.heap().id_of(moved), Some(id));

        isolate.release(handle);
        assert!(isolate.get(handle).is_none());
        isolate.collect_garbage();
        assert!(isolate.heap().find_by_id(id).is_none());
    }

    #[test]
    fn test_release_reuses_slots() {
        let mut isolate = Isolate::new(&RuntimeConfig::default()).unwrap();
        let cell = isolate.heap_mut().new_feedback_cell().unwrap();

        let first = isolate.persist(cell);
        isolate.release(first);
        let second = isolate.persist(cell);
        assert_eq!(first, second);
        assert_eq!(isolate.get(second), Some(cell));
    }
}
