//! Script provenance and the origin check applied to script cache hits.
//!
//! A cached top-level script is only reused for a request that comes from the
//! same place, so that error reporting and host hooks see the right origin.

use bitflags::bitflags;

use crate::memory::{PrimitiveValue, Script};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScriptOriginOptions: u8 {
        const SHARED_CROSS_ORIGIN = 1 << 0;
        const OPAQUE = 1 << 1;
        const WASM = 1 << 2;
        const MODULE = 1 << 3;
    }
}

/// Provenance of a compile request
#[derive(Debug, Clone, Default)]
pub struct ScriptDetails {
    pub name: Option<PrimitiveValue>,
    pub line_offset: i32,
    pub column_offset: i32,
    pub origin_options: ScriptOriginOptions,
    /// `None` is treated as an empty list
    pub host_defined_options: Option<Vec<PrimitiveValue>>,
}

impl ScriptDetails {
    pub fn named(name: impl Into<std::sync::Arc<str>>) -> Self {
        Self {
            name: Some(PrimitiveValue::string(name)),
            ..Self::default()
        }
    }

    pub fn with_offsets(mut self, line_offset: i32, column_offset: i32) -> Self {
        self.line_offset = line_offset;
        self.column_offset = column_offset;
        self
    }

    pub fn with_origin_options(mut self, origin_options: ScriptOriginOptions) -> Self {
        self.origin_options = origin_options;
        self
    }

    pub fn with_host_defined_options(mut self, options: Vec<PrimitiveValue>) -> Self {
        self.host_defined_options = Some(options);
        self
    }
}

/// Whether `script` originates from the place described by `details`.
///
/// Checks run cheapest first and stop at the first mismatch.
pub fn has_origin(script: &Script, details: &ScriptDetails) -> bool {
    let Some(name) = details.name.as_ref() else {
        return script.name.is_undefined();
    };

    if details.line_offset != script.line_offset {
        return false;
    }
    if details.column_offset != script.column_offset {
        return false;
    }
    if details.origin_options != script.origin_options {
        return false;
    }

    match (name.as_str(), script.name.as_str()) {
        (Some(requested), Some(cached)) if requested == cached => {}
        _ => return false,
    }

    let requested = details.host_defined_options.as_deref().unwrap_or(&[]);
    let cached = script.host_defined_options.as_slice();
    if requested.len() != cached.len() {
        return false;
    }

    requested
        .iter()
        .zip(cached)
        .all(|(a, b)| a.strict_equals(b))
}
