//! Generational compilation cache for a managed-heap language runtime.
//!
//! The runtime pieces live in the workspace crates; this crate re-exports
//! them and wires logging and configuration together.

pub use otterc_config::{CompilationCacheConfig, InstrumentationConfig};
pub use otterc_metrics::{CacheCounters, CacheEvent, CacheEventKind, CacheRegion, CounterSnapshot};
pub use otterc_runtime::compilation_cache;
pub use otterc_runtime::memory;
pub use otterc_runtime::{
    CacheError, CollectionReport, CompilationCache, ConfigManager, HeapError, InfoCellPair,
    Isolate, LanguageMode, NO_SOURCE_POSITION, Persistent, RegExpFlags, RuntimeConfig,
    ScriptDetails, ScriptOriginOptions, get_config,
};

use std::path::Path;

use tracing::info;

/// Initialise logging and build an isolate from the global configuration
///
/// The global configuration reads `otter.toml` when TOML support is enabled,
/// then applies environment overrides.
pub fn bootstrap() -> anyhow::Result<Isolate> {
    bootstrap_with(get_config().get())
}

/// Initialise logging and build an isolate from a TOML file, with
/// environment variables taking precedence
pub fn bootstrap_from_file(path: &Path) -> anyhow::Result<Isolate> {
    bootstrap_with(RuntimeConfig::from_file(path)?.merge_with_env())
}

pub fn bootstrap_with(config: RuntimeConfig) -> anyhow::Result<Isolate> {
    utils::init_logging();
    let isolate = Isolate::new(&config)?;
    info!(
        enabled = isolate.compilation_cache().is_enabled(),
        "compilation cache ready"
    );
    Ok(isolate)
}
