//! Garbage collection configuration

use serde::{Deserialize, Serialize};

/// Garbage collection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Maximum heap size in bytes (0 = unlimited)
    pub max_heap_size: usize,
    /// Number of major collections bytecode survives unexecuted before it is old
    pub bytecode_old_age: u8,
    /// Slide live objects together after marking (relocates everything that moves)
    pub compact: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_heap_size: 0, // Unlimited
            bytecode_old_age: 1,
            compact: true,
        }
    }
}

impl GcConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(limit) = lookup("OTTER_GC_MAX_HEAP")
            && let Ok(limit_bytes) = limit.parse::<usize>()
        {
            config.max_heap_size = limit_bytes;
        }

        if let Some(age) = lookup("OTTER_BYTECODE_OLD_AGE")
            && let Ok(age) = age.parse::<u8>()
        {
            config.bytecode_old_age = age.max(1);
        }

        if let Some(compact) = lookup("OTTER_GC_COMPACT")
            && let Ok(compact) = compact.parse::<bool>()
        {
            config.compact = compact;
        }

        config
    }
}
