use serde::{Deserialize, Serialize};

/// Capacity of a freshly allocated cache table.
pub const DEFAULT_INITIAL_TABLE_CAPACITY: usize = 64;

/// Number of rotating regexp generations.
pub const DEFAULT_REGEXP_GENERATIONS: usize = 2;

/// Countdown a newly seeded eval sentinel starts from.
pub const DEFAULT_EVAL_HASH_GENERATIONS: u32 = 10;

/// Smallest table the cache will allocate.
pub const MIN_TABLE_CAPACITY: usize = 4;

/// Largest table the cache will allocate.
pub const MAX_TABLE_CAPACITY: usize = 1 << 30;

/// Round a requested table capacity to a power of two within the table limits
pub const fn table_capacity(requested: usize) -> usize {
    let clamped = if requested < MIN_TABLE_CAPACITY {
        MIN_TABLE_CAPACITY
    } else if requested > MAX_TABLE_CAPACITY {
        MAX_TABLE_CAPACITY
    } else {
        requested
    };
    clamped.next_power_of_two()
}

/// Configuration for the compilation cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationCacheConfig {
    /// Enable the script and eval regions (the regexp region is always on)
    pub enabled: bool,

    /// Evict script entries whose bytecode went old
    pub script_cache_ageing: bool,

    /// Number of regexp generations (at least 2)
    pub regexp_generations: usize,

    /// Initial capacity of every cache table (power of two)
    pub initial_table_capacity: usize,

    /// Number of major collections an eval sentinel survives
    pub eval_hash_generations: u32,

    /// Only cache an eval once it has been put twice within the sentinel window
    pub eval_cache_second_sighting: bool,
}

impl Default for CompilationCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_cache_ageing: true,
            regexp_generations: DEFAULT_REGEXP_GENERATIONS,
            initial_table_capacity: DEFAULT_INITIAL_TABLE_CAPACITY,
            eval_hash_generations: DEFAULT_EVAL_HASH_GENERATIONS,
            eval_cache_second_sighting: false,
        }
    }
}

impl CompilationCacheConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("OTTER_COMPILATION_CACHE") {
            config.enabled = val.parse().unwrap_or(true);
        }

        if let Some(val) = lookup("OTTER_SCRIPT_CACHE_AGEING") {
            config.script_cache_ageing = val.parse().unwrap_or(true);
        }

        if let Some(val) = lookup("OTTER_REGEXP_CACHE_GENERATIONS") {
            config.regexp_generations = val.parse().unwrap_or(DEFAULT_REGEXP_GENERATIONS);
        }

        if let Some(val) = lookup("OTTER_CACHE_TABLE_CAPACITY") {
            config.initial_table_capacity =
                val.parse().unwrap_or(DEFAULT_INITIAL_TABLE_CAPACITY);
        }

        if let Some(val) = lookup("OTTER_EVAL_HASH_GENERATIONS") {
            config.eval_hash_generations = val.parse().unwrap_or(DEFAULT_EVAL_HASH_GENERATIONS);
        }

        if let Some(val) = lookup("OTTER_EVAL_SECOND_SIGHTING") {
            config.eval_cache_second_sighting = val.parse().unwrap_or(false);
        }

        config.normalized()
    }

    /// Clamp every field into the range the cache can work with
    pub fn normalized(mut self) -> Self {
        self.regexp_generations = self.regexp_generations.max(2);
        self.initial_table_capacity = table_capacity(self.initial_table_capacity);
        self.eval_hash_generations = self.eval_hash_generations.max(1);
        self
    }
}
