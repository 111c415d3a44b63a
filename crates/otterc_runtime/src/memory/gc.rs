//! Mark-compact garbage collection

use tracing::debug;
use utils::Stopwatch;

use crate::memory::config::GcConfig;
use crate::memory::heap::{Forwarding, Heap, HeapRef};

/// Which subsystem a root slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Root {
    CompilationCache,
    Handles,
}

/// Receives root slots during a root scan.
///
/// Slots are handed out mutably: a relocating visitor rewrites them in place.
pub trait RootVisitor {
    fn visit_root(&mut self, root: Root, slot: &mut HeapRef);

    fn visit_roots(&mut self, root: Root, slots: &mut [Option<HeapRef>]) {
        for slot in slots.iter_mut().flatten() {
            self.visit_root(root, slot);
        }
    }
}

/// Anything that owns root slots
pub trait Roots {
    fn iterate_roots(&mut self, visitor: &mut dyn RootVisitor);
}

/// Statistics from a garbage collection run
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Number of objects collected
    pub objects_collected: usize,
    /// Bytes freed
    pub bytes_freed: usize,
    /// Number of surviving objects that changed address
    pub objects_moved: usize,
    /// Duration of GC in milliseconds
    pub duration_ms: u64,
}

#[derive(Default)]
struct MarkingVisitor {
    worklist: Vec<HeapRef>,
}

impl RootVisitor for MarkingVisitor {
    fn visit_root(&mut self, _root: Root, slot: &mut HeapRef) {
        self.worklist.push(*slot);
    }
}

struct RelocatingVisitor<'a> {
    forwarding: &'a Forwarding,
}

impl RootVisitor for RelocatingVisitor<'_> {
    fn visit_root(&mut self, _root: Root, slot: &mut HeapRef) {
        self.forwarding.update(slot);
    }
}

/// Stop-the-world mark-compact collector.
///
/// Callers run any prologue work (such as compilation cache ageing) before
/// [`MarkCompactCollector::collect`]; the collector itself only sees roots.
pub struct MarkCompactCollector {
    config: GcConfig,
}

impl MarkCompactCollector {
    pub fn new(config: GcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn collect(&self, heap: &mut Heap, roots: &mut dyn Roots) -> GcStats {
        let stopwatch = Stopwatch::start_new();

        let mut marking = MarkingVisitor::default();
        roots.iterate_roots(&mut marking);
        let marked = heap.mark(marking.worklist);

        heap.age_bytecode(&marked);

        let reclaimed = if self.config.compact {
            heap.compact(&marked)
        } else {
            heap.sweep(&marked)
        };

        if let Some(forwarding) = reclaimed.forwarding.as_ref() {
            roots.iterate_roots(&mut RelocatingVisitor { forwarding });
        }

        let stats = GcStats {
            objects_collected: reclaimed.objects,
            bytes_freed: reclaimed.bytes,
            objects_moved: reclaimed.moved,
            duration_ms: stopwatch.elapsed_ms(),
        };

        debug!(
            collected = stats.objects_collected,
            freed = stats.bytes_freed,
            moved = stats.objects_moved,
            "mark-compact finished"
        );

        stats
    }
}

impl Default for MarkCompactCollector {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}
