//! Resource governor for long-running desktop overlay processes.
//!
//! Bounds the on-disk icon cache to a byte budget with LRU eviction, samples
//! process memory into a bounded window with a growth heuristic, and throttles
//! manual collection requests. [`MemoryOptimizer`] runs all three on a timer.

pub mod clock;
pub mod error;
pub mod gc;
pub mod icon_cache;
pub mod leak;
pub mod monitor;
pub mod optimizer;
pub mod system;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GovernorError;
pub use gc::{platform_gc_hook, GcHelper, GcHook, GcResult, MallocTrim};
pub use icon_cache::{
    cache_file_name, default_cache_dir, generate_cache_key, CacheEntry, CacheStats, CleanupResult,
    IconCacheManager,
};
pub use leak::{LeakPolicy, LeakReport, LeakStrategy, Trend, MIN_LEAK_SAMPLES};
pub use monitor::{MemoryFigures, MemoryMonitor, MemorySample, MemorySource, MemoryStats, ProcSelfSource};
pub use optimizer::{
    CycleListener, GovernorStats, HostBindings, IconCacheUsage, MemoryOptimizer,
    OptimizationCycleResult, OptimizerSettings, OptimizerState,
};
pub use ticker::Ticker;
