use std::sync::Arc;

use otterc_config::{CompilationCacheConfig, InstrumentationConfig};
use otterc_metrics::{CacheCounters, CacheEventKind, CacheEventLog, CacheRegion};
use tracing::debug;

use crate::compilation_cache::eval::{EvalCacheRegion, EvalPut, InfoCellPair};
use crate::compilation_cache::key::{LanguageMode, NO_SOURCE_POSITION, RegExpFlags};
use crate::compilation_cache::origin::ScriptDetails;
use crate::compilation_cache::regexp::RegExpCacheRegion;
use crate::compilation_cache::script::ScriptCacheRegion;
use crate::error::CacheError;
use crate::memory::{Heap, HeapRef, ObjectId, RootVisitor, Roots};

/// Entries removed by one ageing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeReport {
    pub script: usize,
    pub eval_global: usize,
    pub eval_contextual: usize,
}

/// The compilation cache of one isolate.
///
/// Lookups and puts take the heap explicitly; the caller holds both borrows
/// for the duration of the call, which is the whole mutator exclusion story.
pub struct CompilationCache {
    config: CompilationCacheConfig,
    enabled: bool,
    script: ScriptCacheRegion,
    eval_global: EvalCacheRegion,
    eval_contextual: EvalCacheRegion,
    regexp: RegExpCacheRegion,
    counters: Arc<CacheCounters>,
    events: Arc<CacheEventLog>,
}

impl CompilationCache {
    pub fn new(config: CompilationCacheConfig, instrumentation: InstrumentationConfig) -> Self {
        let config = config.normalized();
        Self {
            enabled: config.enabled,
            script: ScriptCacheRegion::new(&config),
            eval_global: EvalCacheRegion::new(&config),
            eval_contextual: EvalCacheRegion::new(&config),
            regexp: RegExpCacheRegion::new(&config),
            counters: Arc::new(CacheCounters::new()),
            events: Arc::new(CacheEventLog::new(instrumentation)),
            config,
        }
    }

    pub fn config(&self) -> &CompilationCacheConfig {
        &self.config
    }

    pub fn counters(&self) -> &Arc<CacheCounters> {
        &self.counters
    }

    pub fn events(&self) -> &Arc<CacheEventLog> {
        &self.events
    }

    pub fn script(&self) -> &ScriptCacheRegion {
        &self.script
    }

    pub fn eval_global(&self) -> &EvalCacheRegion {
        &self.eval_global
    }

    pub fn eval_global_mut(&mut self) -> &mut EvalCacheRegion {
        &mut self.eval_global
    }

    pub fn eval_contextual(&self) -> &EvalCacheRegion {
        &self.eval_contextual
    }

    pub fn eval_contextual_mut(&mut self) -> &mut EvalCacheRegion {
        &mut self.eval_contextual
    }

    pub fn regexp(&self) -> &RegExpCacheRegion {
        &self.regexp
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Turn off the script and eval regions and drop their contents
    pub fn disable(&mut self) {
        self.enabled = false;
        self.script.clear();
        self.eval_global.clear();
        self.eval_contextual.clear();
        debug!("compilation cache disabled");
    }

    pub fn lookup_script(
        &self,
        heap: &Heap,
        source: &str,
        details: &ScriptDetails,
        language_mode: LanguageMode,
    ) -> Option<HeapRef> {
        let result = if self.enabled {
            self.script.lookup(heap, source, details, language_mode)
        } else {
            None
        };

        self.counters.record_lookup(CacheRegion::Script, result.is_some());
        if let Some(shared) = result {
            self.record_event(heap, CacheEventKind::Hit, CacheRegion::Script, shared);
        }
        result
    }

    pub fn put_script(
        &mut self,
        heap: &mut Heap,
        source: impl Into<Arc<str>>,
        language_mode: LanguageMode,
        artifact: HeapRef,
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        self.script.put(heap, source.into(), language_mode, artifact)?;
        self.record_event(heap, CacheEventKind::Put, CacheRegion::Script, artifact);
        Ok(())
    }

    /// Look up an eval compiled inside `context`.
    ///
    /// A native context selects the global region; any other context selects
    /// the contextual region keyed by its native context.
    pub fn lookup_eval(
        &self,
        heap: &Heap,
        source: &str,
        outer_info: HeapRef,
        context: HeapRef,
        language_mode: LanguageMode,
        position: i32,
    ) -> Option<InfoCellPair> {
        let route = route_eval(heap, context);
        let region = route.map_or(CacheRegion::EvalContextual, |(region, _)| region);

        let result = match route {
            Some((region, native_context)) if self.enabled => self.eval_region(region).lookup(
                heap,
                source,
                outer_info,
                native_context,
                language_mode,
                position,
            ),
            _ => None,
        };

        self.counters.record_lookup(region, result.is_some());
        if let Some(pair) = result {
            self.record_event(heap, CacheEventKind::Hit, region, pair.shared);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_eval(
        &mut self,
        heap: &mut Heap,
        source: impl Into<Arc<str>>,
        outer_info: HeapRef,
        context: HeapRef,
        artifact: HeapRef,
        feedback_cell: Option<HeapRef>,
        position: i32,
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let (region, native_context) =
            route_eval(heap, context).ok_or(CacheError::InvalidContext { reference: context })?;
        if region == CacheRegion::EvalContextual {
            debug_assert_ne!(position, NO_SOURCE_POSITION);
        }

        let outcome = self.eval_region_mut(region).put(
            heap,
            source.into(),
            outer_info,
            native_context,
            artifact,
            feedback_cell,
            position,
        )?;
        if outcome == EvalPut::Stored {
            self.record_event(heap, CacheEventKind::Put, region, artifact);
        }
        Ok(())
    }

    pub fn lookup_regexp(
        &mut self,
        heap: &mut Heap,
        pattern: &str,
        flags: RegExpFlags,
    ) -> Option<HeapRef> {
        let result = self.regexp.lookup(heap, pattern, flags);
        self.counters.record_lookup(CacheRegion::RegExp, result.is_some());
        result
    }

    pub fn put_regexp(
        &mut self,
        heap: &mut Heap,
        pattern: impl Into<Arc<str>>,
        flags: RegExpFlags,
        data: HeapRef,
    ) -> Result<(), CacheError> {
        self.regexp.put(heap, pattern.into(), flags, data)?;
        Ok(())
    }

    /// Forget every script and eval entry holding `artifact`
    pub fn remove(&mut self, heap: &mut Heap, artifact: HeapRef) {
        if !self.enabled {
            return;
        }

        let removed = self.script.remove(heap, artifact)
            + self.eval_global.remove(heap, artifact)
            + self.eval_contextual.remove(heap, artifact);
        debug!(%artifact, removed, "removed artifact from compilation cache");
    }

    pub fn clear(&mut self) {
        self.script.clear();
        self.eval_global.clear();
        self.eval_contextual.clear();
        self.regexp.clear();
    }

    /// Age every region; runs once per major collection before marking
    pub fn mark_compact_prologue(&mut self, heap: &mut Heap) -> AgeReport {
        let report = AgeReport {
            script: self.script.age(heap),
            eval_global: self.eval_global.age(heap),
            eval_contextual: self.eval_contextual.age(heap),
        };
        self.regexp.age();

        debug!(
            script = report.script,
            eval_global = report.eval_global,
            eval_contextual = report.eval_contextual,
            "compilation cache aged"
        );
        report
    }

    pub fn iterate(&mut self, visitor: &mut dyn RootVisitor) {
        self.script.iterate(visitor);
        self.eval_global.iterate(visitor);
        self.eval_contextual.iterate(visitor);
        self.regexp.iterate(visitor);
    }

    fn eval_region(&self, region: CacheRegion) -> &EvalCacheRegion {
        if region == CacheRegion::EvalGlobal {
            &self.eval_global
        } else {
            &self.eval_contextual
        }
    }

    fn eval_region_mut(&mut self, region: CacheRegion) -> &mut EvalCacheRegion {
        if region == CacheRegion::EvalGlobal {
            &mut self.eval_global
        } else {
            &mut self.eval_contextual
        }
    }

    fn record_event(&self, heap: &Heap, kind: CacheEventKind, region: CacheRegion, artifact: HeapRef) {
        let identity = heap.id_of(artifact).map_or(0, ObjectId::as_u64);
        self.events.record(kind, region, identity);
    }
}

impl Roots for CompilationCache {
    fn iterate_roots(&mut self, visitor: &mut dyn RootVisitor) {
        self.iterate(visitor);
    }
}

impl Default for CompilationCache {
    fn default() -> Self {
        Self::new(
            CompilationCacheConfig::default(),
            InstrumentationConfig::default(),
        )
    }
}

fn route_eval(heap: &Heap, context: HeapRef) -> Option<(CacheRegion, HeapRef)> {
    let ctx = heap.context(context)?;
    match ctx.native_context {
        None => Some((CacheRegion::EvalGlobal, context)),
        Some(native_context) => Some((CacheRegion::EvalContextual, native_context)),
    }
}
