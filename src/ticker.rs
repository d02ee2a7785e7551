//! Cancellable periodic task on the tokio runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Handle to a running periodic task. Dropping it cancels the task.
///
/// The tick body runs to completion before the next tick is scheduled, so a
/// slow body delays the following tick instead of overlapping with it. On a
/// multi-threaded runtime the body runs under `block_in_place`, so filesystem
/// work in it does not stall other tasks on the worker.
pub struct Ticker {
    name: &'static str,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawns `tick` every `period`, first firing one period from now.
    ///
    /// Returns `None` when called outside a tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot schedule {} ticker without a runtime: {}", name, e);
                return None;
            }
        };

        let blocking = runtime.runtime_flavor() == RuntimeFlavor::MultiThread;
        let period = period.max(Duration::from_millis(1));
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let handle = runtime.spawn(async move {
            let mut int = interval_at(Instant::now() + period, period);
            int.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("{} ticker started with {:?} period", name, period);

            loop {
                tokio::select! {
                    _ = int.tick() => {
                        if blocking {
                            tokio::task::block_in_place(&mut tick);
                        } else {
                            tick();
                        }
                    }
                    _ = signal.notified() => break,
                }
            }
            debug!("{} ticker exited", name);
        });

        Some(Self {
            name,
            shutdown,
            handle,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stops the task. Equivalent to dropping the handle.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        self.handle.abort();
        debug!("{} ticker cancelled", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let ticker = Ticker::spawn("test", Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(ticker.name(), "test");

        // No tick fires before the first period elapses.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        ticker.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ticks_on_multi_thread_runtime() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let ticker = Ticker::spawn("blocking", Duration::from_millis(10), move || {
            std::thread::sleep(Duration::from_millis(1));
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(ticker);
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_spawn_without_runtime() {
        assert!(Ticker::spawn("orphan", Duration::from_secs(1), || {}).is_none());
    }
}
