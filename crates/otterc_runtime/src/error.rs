//! Runtime error types

use thiserror::Error;

use crate::memory::HeapRef;

/// Failures of the managed heap
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The heap cannot satisfy an allocation without exceeding its limit
    #[error("heap exhausted: requested {requested} bytes with {used} of {limit} bytes in use")]
    OutOfMemory {
        requested: usize,
        used: usize,
        limit: usize,
    },

    /// A handle does not point at a live object of the expected kind
    #[error("{reference} does not refer to a live {expected}")]
    InvalidReference {
        reference: HeapRef,
        expected: &'static str,
    },
}

/// Failures of compilation cache operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Allocating or growing a cache table failed
    #[error("compilation cache table allocation failed: {0}")]
    Allocation(#[from] HeapError),

    /// An eval was put against something that is not a context
    #[error("{reference} is not a context")]
    InvalidContext { reference: HeapRef },
}

impl CacheError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, CacheError::Allocation(HeapError::OutOfMemory { .. }))
    }
}
