//! Compilation cache
//!
//! Maps source text plus disambiguating context to previously compiled
//! artifacts. Four regions with their own eviction rules:
//!
//! - script: sweep of artifacts whose bytecode went old, origin-checked hits
//! - eval (global and contextual): the same sweep plus countdown sentinels
//! - regexp: N rotating generations with promotion on hit
//!
//! All tables live on the managed heap and are reported to the collector as
//! roots through [`CompilationCache::iterate`].

pub mod cache;
pub mod eval;
pub mod key;
pub mod origin;
pub mod regexp;
pub mod script;
pub mod table;

pub use cache::{AgeReport, CompilationCache};
pub use eval::{EvalCacheRegion, EvalPut, InfoCellPair};
pub use key::{CacheKey, EvalKey, LanguageMode, NO_SOURCE_POSITION, RegExpFlags, RegExpKey, ScriptKey};
pub use origin::{ScriptDetails, ScriptOriginOptions, has_origin};
pub use regexp::RegExpCacheRegion;
pub use script::ScriptCacheRegion;
pub use table::{CacheEntry, CacheTable, CacheValue, TableSlot};
