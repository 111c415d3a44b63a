//! Runtime configuration system
//!
//! Centralized configuration for the heap, the collector, the compilation
//! cache and its instrumentation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::memory::config::GcConfig;
use otterc_config::{CompilationCacheConfig, InstrumentationConfig};

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Garbage collection configuration
    pub gc: GcConfig,

    /// Compilation cache configuration
    pub compilation_cache: CompilationCacheConfig,

    /// Cache counters and event log
    pub instrumentation: InstrumentationConfig,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            gc: GcConfig::from_env(),
            compilation_cache: CompilationCacheConfig::from_env(),
            instrumentation: InstrumentationConfig::from_env(),
        }
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml-config")]
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn from_file(_path: &Path) -> anyhow::Result<Self> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Save configuration to TOML file
    #[cfg(feature = "toml-config")]
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Save configuration to TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn save_to_file(&self, _path: &Path) -> anyhow::Result<()> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Merge with environment variables (env vars take precedence)
    pub fn merge_with_env(self) -> Self {
        self.merge_with_vars(|name| std::env::var(name).ok())
    }

    /// Overlay only the variables that are actually set
    pub fn merge_with_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_config = Self {
            gc: GcConfig::from_vars(&lookup),
            compilation_cache: CompilationCacheConfig::from_vars(&lookup),
            instrumentation: InstrumentationConfig::from_vars(&lookup),
        };
        let is_set = |name: &str| lookup(name).is_some();

        if is_set("OTTER_GC_MAX_HEAP") {
            self.gc.max_heap_size = env_config.gc.max_heap_size;
        }
        if is_set("OTTER_BYTECODE_OLD_AGE") {
            self.gc.bytecode_old_age = env_config.gc.bytecode_old_age;
        }
        if is_set("OTTER_GC_COMPACT") {
            self.gc.compact = env_config.gc.compact;
        }

        let cache = &mut self.compilation_cache;
        if is_set("OTTER_COMPILATION_CACHE") {
            cache.enabled = env_config.compilation_cache.enabled;
        }
        if is_set("OTTER_SCRIPT_CACHE_AGEING") {
            cache.script_cache_ageing = env_config.compilation_cache.script_cache_ageing;
        }
        if is_set("OTTER_REGEXP_CACHE_GENERATIONS") {
            cache.regexp_generations = env_config.compilation_cache.regexp_generations;
        }
        if is_set("OTTER_CACHE_TABLE_CAPACITY") {
            cache.initial_table_capacity = env_config.compilation_cache.initial_table_capacity;
        }
        if is_set("OTTER_EVAL_HASH_GENERATIONS") {
            cache.eval_hash_generations = env_config.compilation_cache.eval_hash_generations;
        }
        if is_set("OTTER_EVAL_SECOND_SIGHTING") {
            cache.eval_cache_second_sighting =
                env_config.compilation_cache.eval_cache_second_sighting;
        }

        if is_set("OTTER_CACHE_LOG_EVENTS") {
            self.instrumentation.log_events = env_config.instrumentation.log_events;
        }
        if is_set("OTTER_CACHE_EVENT_HISTORY") {
            self.instrumentation.max_event_history = env_config.instrumentation.max_event_history;
        }

        self
    }
}

/// Global runtime configuration manager
pub struct ConfigManager {
    config: Arc<RwLock<RuntimeConfig>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(RuntimeConfig::default())),
        }
    }

    /// Initialize from environment and optional config file
    pub fn init(&self, config_file: Option<&Path>) -> anyhow::Result<()> {
        let mut config = if let Some(path) = config_file {
            RuntimeConfig::from_file(path)?
        } else {
            RuntimeConfig::default()
        };

        config = config.merge_with_env();

        *self.config.write() = config;
        Ok(())
    }

    /// Like [`init`](Self::init), but a file that fails to load is reported
    /// and replaced by defaults plus environment overrides
    pub fn init_or_default(&self, config_file: Option<&Path>) {
        if let Err(err) = self.init(config_file) {
            warn!(
                path = ?config_file,
                error = %err,
                "failed to load runtime configuration, using defaults"
            );
            *self.config.write() = RuntimeConfig::default().merge_with_env();
        }
    }

    /// Get current configuration
    pub fn get(&self) -> RuntimeConfig {
        self.config.read().clone()
    }

    /// Update configuration
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let mut config = self.config.write();
        f(&mut config);
    }

    pub fn compilation_cache(&self) -> CompilationCacheConfig {
        self.config.read().compilation_cache.clone()
    }

    pub fn gc(&self) -> GcConfig {
        self.config.read().gc.clone()
    }

    pub fn is_compilation_cache_enabled(&self) -> bool {
        self.config.read().compilation_cache.enabled
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Global configuration manager instance
static GLOBAL_CONFIG: once_cell::sync::Lazy<ConfigManager> = once_cell::sync::Lazy::new(|| {
    let manager = ConfigManager::new();
    let default_config_path = Path::new("otter.toml");
    if cfg!(feature = "toml-config") && default_config_path.exists() {
        manager.init_or_default(Some(default_config_path));
    } else {
        manager.init_or_default(None);
    }
    manager
});

/// Get the global configuration manager
pub fn get_config() -> &'static ConfigManager {
    &GLOBAL_CONFIG
}
