//! Throttled manual collection requests.
//!
//! The host may or may not expose a manual collection hook. When it does not,
//! [`GcHelper::request_gc`] returns `None`, which is the normal steady state
//! on most targets rather than an error.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::monitor::MemorySource;
use crate::system::{allocator_trim_supported, trim_allocator};

/// Manual collection trigger exposed by the host.
pub trait GcHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn collect(&self);
}

/// glibc `malloc_trim(0)`: returns free arena pages to the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct MallocTrim;

impl GcHook for MallocTrim {
    fn name(&self) -> &'static str {
        "malloc_trim"
    }

    fn collect(&self) {
        let released = trim_allocator();
        debug!("malloc_trim released memory: {}", released);
    }
}

/// The collection hook available on this build target, if any.
pub fn platform_gc_hook() -> Option<Arc<dyn GcHook>> {
    if allocator_trim_supported() {
        Some(Arc::new(MallocTrim))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GcResult {
    /// `before - after`; negative when usage grew during collection.
    pub freed: i64,
    pub before: u64,
    pub after: u64,
}

pub struct GcHelper {
    hook: Option<Arc<dyn GcHook>>,
    source: Arc<dyn MemorySource>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    last_gc: Mutex<Option<i64>>,
}

impl GcHelper {
    pub fn new(
        interval: Duration,
        hook: Option<Arc<dyn GcHook>>,
        source: Arc<dyn MemorySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hook,
            source,
            clock,
            interval,
            last_gc: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.hook.is_some()
    }

    /// Runs the hook and measures heap usage around it.
    pub fn request_gc(&self) -> Option<GcResult> {
        let hook = self.hook.as_ref()?;

        let before = self.source.sample(self.clock.now_millis()).heap_used;
        hook.collect();
        let after = self.source.sample(self.clock.now_millis()).heap_used;

        let freed = before as i64 - after as i64;
        debug!(
            "{} collection: before={} after={} freed={}",
            hook.name(),
            before,
            after,
            freed
        );
        Some(GcResult {
            freed,
            before,
            after,
        })
    }

    /// Like [`request_gc`](Self::request_gc) but at most once per interval.
    pub fn request_gc_if_needed(&self) -> Option<GcResult> {
        let now = self.clock.now_millis();
        {
            let mut last = self.last_gc.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(prev) = *last {
                let elapsed = now.saturating_sub(prev);
                if elapsed < self.interval.as_millis() as i64 {
                    debug!("GC throttled: {}ms since last request", elapsed);
                    return None;
                }
            }
            *last = Some(now);
        }
        self.request_gc()
    }
}
