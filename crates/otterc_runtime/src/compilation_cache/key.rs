use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHasher;
use bitflags::bitflags;

use crate::memory::{Forwarding, HeapRef};

/// Marker for "no source position" in eval keys.
pub const NO_SOURCE_POSITION: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LanguageMode {
    #[default]
    Sloppy,
    Strict,
}

bitflags! {
    /// Flags a regular expression was compiled with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegExpFlags: u16 {
        const GLOBAL = 1 << 0;
        const IGNORE_CASE = 1 << 1;
        const MULTILINE = 1 << 2;
        const STICKY = 1 << 3;
        const UNICODE = 1 << 4;
        const DOT_ALL = 1 << 5;
        const LINEAR = 1 << 6;
        const HAS_INDICES = 1 << 7;
        const UNICODE_SETS = 1 << 8;
    }
}

// Discriminants mixed into hashes so that equal text in different key kinds
// lands in different buckets.
const SCRIPT_TAG: u8 = 1;
const EVAL_TAG: u8 = 2;
const REGEXP_TAG: u8 = 3;

fn finish(hasher: &AHasher) -> u32 {
    let full = hasher.finish();
    (full ^ (full >> 32)) as u32
}

/// Top-level script key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptKey {
    pub source: Arc<str>,
    pub language_mode: LanguageMode,
}

impl ScriptKey {
    pub fn hash_of(source: &str, language_mode: LanguageMode) -> u32 {
        let mut hasher = AHasher::default();
        SCRIPT_TAG.hash(&mut hasher);
        source.hash(&mut hasher);
        language_mode.hash(&mut hasher);
        finish(&hasher)
    }

    pub fn matches(&self, source: &str, language_mode: LanguageMode) -> bool {
        self.language_mode == language_mode && &*self.source == source
    }
}

/// Eval key.
///
/// Handle-valued parts (`outer_info`, `native_context`) are compared by
/// identity but kept out of the hash, so relocation never moves an entry's
/// bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalKey {
    pub source: Arc<str>,
    pub outer_info: HeapRef,
    pub native_context: HeapRef,
    pub language_mode: LanguageMode,
    pub position: i32,
}

impl EvalKey {
    pub fn hash_of(source: &str, language_mode: LanguageMode, position: i32) -> u32 {
        let mut hasher = AHasher::default();
        EVAL_TAG.hash(&mut hasher);
        source.hash(&mut hasher);
        language_mode.hash(&mut hasher);
        position.hash(&mut hasher);
        finish(&hasher)
    }

    pub fn matches(
        &self,
        source: &str,
        outer_info: HeapRef,
        native_context: HeapRef,
        language_mode: LanguageMode,
        position: i32,
    ) -> bool {
        self.outer_info == outer_info
            && self.native_context == native_context
            && self.language_mode == language_mode
            && self.position == position
            && &*self.source == source
    }
}

/// Regular expression key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExpKey {
    pub pattern: Arc<str>,
    pub flags: RegExpFlags,
}

impl RegExpKey {
    pub fn hash_of(pattern: &str, flags: RegExpFlags) -> u32 {
        let mut hasher = AHasher::default();
        REGEXP_TAG.hash(&mut hasher);
        pattern.hash(&mut hasher);
        flags.hash(&mut hasher);
        finish(&hasher)
    }

    pub fn matches(&self, pattern: &str, flags: RegExpFlags) -> bool {
        self.flags == flags && &*self.pattern == pattern
    }
}

/// Key of a cache table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    Script(ScriptKey),
    Eval(EvalKey),
    RegExp(RegExpKey),
    /// Eval placeholder keyed by the hash of the eval key it stands in for
    Sentinel(u32),
}

impl CacheKey {
    pub fn hash(&self) -> u32 {
        match self {
            CacheKey::Script(key) => ScriptKey::hash_of(&key.source, key.language_mode),
            CacheKey::Eval(key) => EvalKey::hash_of(&key.source, key.language_mode, key.position),
            CacheKey::RegExp(key) => RegExpKey::hash_of(&key.pattern, key.flags),
            CacheKey::Sentinel(hash) => *hash,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, CacheKey::Sentinel(_))
    }

    pub(crate) fn trace(&self, visit: &mut dyn FnMut(HeapRef)) {
        if let CacheKey::Eval(key) = self {
            visit(key.outer_info);
            visit(key.native_context);
        }
    }

    pub(crate) fn relocate(&mut self, forwarding: &Forwarding) {
        if let CacheKey::Eval(key) = self {
            forwarding.update(&mut key.outer_info);
            forwarding.update(&mut key.native_context);
        }
    }
}
