pub mod compilation_cache;
pub mod config;
pub mod error;
pub mod isolate;
pub mod memory;

pub use compilation_cache::{
    CompilationCache, InfoCellPair, LanguageMode, NO_SOURCE_POSITION, RegExpFlags, ScriptDetails,
    ScriptOriginOptions,
};
pub use config::{ConfigManager, RuntimeConfig, get_config};
pub use error::{CacheError, HeapError};
pub use isolate::{CollectionReport, Isolate, Persistent};
