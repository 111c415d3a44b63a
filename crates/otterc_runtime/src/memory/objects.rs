//! Object kinds living on the managed heap

use std::sync::Arc;

use crate::compilation_cache::{
    CacheTable, LanguageMode, RegExpFlags, ScriptDetails, ScriptOriginOptions,
};
use crate::memory::heap::{Forwarding, HeapRef};

/// Word size used for heap accounting.
const WORD: usize = 8;

/// Primitive values as they appear in script provenance.
#[derive(Debug, Clone)]
pub enum PrimitiveValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    /// Symbols compare by identity only
    Symbol(u64),
}

impl PrimitiveValue {
    pub fn string(value: impl Into<Arc<str>>) -> Self {
        PrimitiveValue::String(value.into())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, PrimitiveValue::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrimitiveValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Identity-or-value equality; never structural.
    ///
    /// Numbers follow IEEE comparison (`NaN` is unequal to itself, `0.0 == -0.0`).
    pub fn strict_equals(&self, other: &PrimitiveValue) -> bool {
        match (self, other) {
            (PrimitiveValue::Undefined, PrimitiveValue::Undefined)
            | (PrimitiveValue::Null, PrimitiveValue::Null) => true,
            (PrimitiveValue::Boolean(a), PrimitiveValue::Boolean(b)) => a == b,
            (PrimitiveValue::Number(a), PrimitiveValue::Number(b)) => a == b,
            (PrimitiveValue::String(a), PrimitiveValue::String(b)) => a == b,
            (PrimitiveValue::Symbol(a), PrimitiveValue::Symbol(b)) => a == b,
            _ => false,
        }
    }

    fn size(&self) -> usize {
        match self {
            PrimitiveValue::String(value) => WORD * 2 + value.len(),
            _ => WORD * 2,
        }
    }
}

/// Provenance of a top-level script
#[derive(Debug, Clone)]
pub struct Script {
    pub source: Arc<str>,
    pub name: PrimitiveValue,
    pub line_offset: i32,
    pub column_offset: i32,
    pub origin_options: ScriptOriginOptions,
    pub host_defined_options: Vec<PrimitiveValue>,
}

impl Script {
    pub fn new(source: impl Into<Arc<str>>, details: &ScriptDetails) -> Self {
        Self {
            source: source.into(),
            name: details.name.clone().unwrap_or(PrimitiveValue::Undefined),
            line_offset: details.line_offset,
            column_offset: details.column_offset,
            origin_options: details.origin_options,
            host_defined_options: details.host_defined_options.clone().unwrap_or_default(),
        }
    }
}

/// Executable bytecode and its age in major collections
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub length: usize,
    age: u8,
}

impl Bytecode {
    pub fn new(length: usize) -> Self {
        Self { length, age: 0 }
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn is_old(&self, old_age: u8) -> bool {
        self.age >= old_age
    }

    pub fn make_older(&mut self) {
        self.age = self.age.saturating_add(1);
    }

    pub fn reset_age(&mut self) {
        self.age = 0;
    }
}

/// Compiled representation of a program or function
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: Arc<str>,
    pub language_mode: LanguageMode,
    /// Script this artifact was compiled from
    pub script: Option<HeapRef>,
    /// Absent while the function is lazily uncompiled
    pub bytecode: Option<Bytecode>,
}

impl Artifact {
    pub fn new(name: impl Into<Arc<str>>, language_mode: LanguageMode) -> Self {
        Self {
            name: name.into(),
            language_mode,
            script: None,
            bytecode: None,
        }
    }

    pub fn with_script(mut self, script: HeapRef) -> Self {
        self.script = Some(script);
        self
    }

    pub fn with_bytecode(mut self, length: usize) -> Self {
        self.bytecode = Some(Bytecode::new(length));
        self
    }

    pub fn has_bytecode(&self) -> bool {
        self.bytecode.is_some()
    }

    /// Whether the bytecode has gone unexecuted long enough to be dropped
    pub fn is_old(&self, old_age: u8) -> bool {
        self.bytecode
            .as_ref()
            .is_some_and(|bytecode| bytecode.is_old(old_age))
    }

    /// Record an execution; resets the bytecode age
    pub fn mark_executed(&mut self) {
        if let Some(bytecode) = self.bytecode.as_mut() {
            bytecode.reset_age();
        }
    }
}

/// Execution context; a native context has no outer native context
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub native_context: Option<HeapRef>,
}

impl Context {
    pub fn native() -> Self {
        Self::default()
    }

    pub fn nested(native_context: HeapRef) -> Self {
        Self {
            native_context: Some(native_context),
        }
    }

    pub fn is_native_context(&self) -> bool {
        self.native_context.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackCell {
    pub invocation_count: u32,
}

/// Compiled regular expression data
#[derive(Debug, Clone)]
pub struct RegExpData {
    pub pattern: Arc<str>,
    pub flags: RegExpFlags,
    pub bytecode: Vec<u8>,
}

impl RegExpData {
    pub fn new(pattern: impl Into<Arc<str>>, flags: RegExpFlags, bytecode: Vec<u8>) -> Self {
        Self {
            pattern: pattern.into(),
            flags,
            bytecode,
        }
    }
}

/// Every kind of object the heap can hold
#[derive(Debug, Clone)]
pub enum HeapObject {
    Script(Script),
    Artifact(Artifact),
    Context(Context),
    FeedbackCell(FeedbackCell),
    RegExpData(RegExpData),
    CacheTable(CacheTable),
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Script(_) => "script",
            HeapObject::Artifact(_) => "artifact",
            HeapObject::Context(_) => "context",
            HeapObject::FeedbackCell(_) => "feedback cell",
            HeapObject::RegExpData(_) => "regexp data",
            HeapObject::CacheTable(_) => "cache table",
        }
    }

    /// Approximate footprint used for heap limit accounting
    pub fn size(&self) -> usize {
        match self {
            HeapObject::Script(script) => {
                WORD * 4
                    + script.source.len()
                    + script.name.size()
                    + script
                        .host_defined_options
                        .iter()
                        .map(PrimitiveValue::size)
                        .sum::<usize>()
            }
            HeapObject::Artifact(artifact) => {
                WORD * 4
                    + artifact.name.len()
                    + artifact.bytecode.as_ref().map_or(0, |bytecode| bytecode.length)
            }
            HeapObject::Context(_) => WORD * 2,
            HeapObject::FeedbackCell(_) => WORD * 2,
            HeapObject::RegExpData(data) => WORD * 3 + data.pattern.len() + data.bytecode.len(),
            HeapObject::CacheTable(table) => table.footprint(),
        }
    }

    /// Report every reference this object holds
    pub(crate) fn trace(&self, visit: &mut dyn FnMut(HeapRef)) {
        match self {
            HeapObject::Artifact(artifact) => {
                if let Some(script) = artifact.script {
                    visit(script);
                }
            }
            HeapObject::Context(context) => {
                if let Some(native) = context.native_context {
                    visit(native);
                }
            }
            HeapObject::CacheTable(table) => table.trace(visit),
            HeapObject::Script(_) | HeapObject::FeedbackCell(_) | HeapObject::RegExpData(_) => {}
        }
    }

    /// Rewrite every held reference after compaction
    pub(crate) fn relocate(&mut self, forwarding: &Forwarding) {
        match self {
            HeapObject::Artifact(artifact) => {
                if let Some(script) = artifact.script.as_mut() {
                    forwarding.update(script);
                }
            }
            HeapObject::Context(context) => {
                if let Some(native) = context.native_context.as_mut() {
                    forwarding.update(native);
                }
            }
            HeapObject::CacheTable(table) => table.relocate(forwarding),
            HeapObject::Script(_) | HeapObject::FeedbackCell(_) | HeapObject::RegExpData(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_equals() {
        assert!(PrimitiveValue::string("a").strict_equals(&PrimitiveValue::string("a")));
        assert!(!PrimitiveValue::string("1").strict_equals(&PrimitiveValue::Number(1.0)));
        assert!(!PrimitiveValue::Number(f64::NAN).strict_equals(&PrimitiveValue::Number(f64::NAN)));
        assert!(PrimitiveValue::Number(0.0).strict_equals(&PrimitiveValue::Number(-0.0)));
        assert!(!PrimitiveValue::Symbol(1).strict_equals(&PrimitiveValue::Symbol(2)));
        assert!(!PrimitiveValue::Null.strict_equals(&PrimitiveValue::Undefined));
    }

    #[test]
    fn test_bytecode_ageing() {
        let mut artifact = Artifact::new("f", LanguageMode::Sloppy).with_bytecode(16);
        assert!(!artifact.is_old(1));
        if let Some(bytecode) = artifact.bytecode.as_mut() {
            bytecode.make_older();
        }
        assert!(artifact.is_old(1));
        assert!(!artifact.is_old(2));
        artifact.mark_executed();
        assert!(!artifact.is_old(1));
    }

    #[test]
    fn test_artifact_without_bytecode_is_never_old() {
        let artifact = Artifact::new("lazy", LanguageMode::Strict);
        assert!(!artifact.has_bytecode());
        assert!(!artifact.is_old(0));
    }
}
