//! Memory management system for OtterLang
//!
//! Provides the managed heap the compilation cache stores into and the
//! mark-compact collector that ages and relocates it.

pub mod config;
pub mod gc;
pub mod heap;
pub mod objects;

pub use config::GcConfig;
pub use gc::{GcStats, MarkCompactCollector, Root, RootVisitor, Roots};
pub use heap::{Forwarding, Heap, HeapRef, ObjectId};
pub use objects::{
    Artifact, Bytecode, Context, FeedbackCell, HeapObject, PrimitiveValue, RegExpData, Script,
};
