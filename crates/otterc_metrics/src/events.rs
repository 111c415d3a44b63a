//! Structured hit/put events emitted by the compilation cache

use std::collections::VecDeque;
use std::fmt;

use otterc_config::InstrumentationConfig;
use parking_lot::RwLock;
use tracing::debug;

use crate::counters::CacheRegion;

fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    Hit,
    Put,
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEventKind::Hit => f.write_str("hit"),
            CacheEventKind::Put => f.write_str("put"),
        }
    }
}

/// A single cache event
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// What happened
    pub kind: CacheEventKind,

    /// Region the event happened in
    pub region: CacheRegion,

    /// Stable identity of the artifact involved
    pub artifact: u64,

    /// Timestamp (milliseconds since epoch)
    pub timestamp_ms: u64,
}

/// Bounded in-memory history of cache events
pub struct CacheEventLog {
    config: InstrumentationConfig,
    history: RwLock<VecDeque<CacheEvent>>,
}

impl CacheEventLog {
    pub fn new(config: InstrumentationConfig) -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(config.max_event_history.min(1024))),
            config,
        }
    }

    pub fn record(&self, kind: CacheEventKind, region: CacheRegion, artifact: u64) {
        if !self.config.log_events {
            return;
        }

        debug!(event = %kind, region = %region, artifact, "compilation cache event");

        if self.config.max_event_history == 0 {
            return;
        }

        let mut history = self.history.write();
        while history.len() >= self.config.max_event_history {
            history.pop_front();
        }
        history.push_back(CacheEvent {
            kind,
            region,
            artifact,
            timestamp_ms: current_time_ms(),
        });
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.history.read().iter().cloned().collect()
    }

    pub fn events_for(&self, region: CacheRegion) -> Vec<CacheEvent> {
        self.history
            .read()
            .iter()
            .filter(|event| event.region == region)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    pub fn clear(&self) {
        self.history.write().clear();
    }
}

impl Default for CacheEventLog {
    fn default() -> Self {
        Self::new(InstrumentationConfig::default())
    }
}
