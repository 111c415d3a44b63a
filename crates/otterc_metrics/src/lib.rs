// Compilation cache instrumentation
pub mod counters;
pub mod events;

pub use counters::{CacheCounters, CacheRegion, CounterSnapshot, RegionCounters};
pub use events::{CacheEvent, CacheEventKind, CacheEventLog};
