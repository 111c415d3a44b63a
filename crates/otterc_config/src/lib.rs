pub mod compilation_cache;
pub mod instrumentation;

pub use crate::compilation_cache::*;
pub use crate::instrumentation::InstrumentationConfig;
