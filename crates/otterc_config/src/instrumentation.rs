use serde::{Deserialize, Serialize};

/// Cache instrumentation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Record hit/put events
    pub log_events: bool,

    /// Maximum number of events kept in memory
    pub max_event_history: usize,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            log_events: true,
            max_event_history: 1024,
        }
    }
}

impl InstrumentationConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("OTTER_CACHE_LOG_EVENTS") {
            config.log_events = val.parse().unwrap_or(true);
        }

        if let Some(val) = lookup("OTTER_CACHE_EVENT_HISTORY") {
            config.max_event_history = val.parse().unwrap_or(1024);
        }

        config
    }
}
