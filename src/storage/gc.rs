//! Background Expiration Sweeper
//!
//! Lazy expiry only reclaims entries that something reads again. Entries
//! that expire and are never touched would otherwise sit in memory until
//! eviction pressure pushes them out, so a background task periodically
//! runs a probabilistic sweep over the keyspace.
//!
//! ## Algorithm
//!
//! Every tick (default 100 ms) the sweeper samples up to 20 entries
//! uniformly at random from the cache's sampling array and removes the
//! expired ones. If more than 25% of the sample was expired, it sweeps
//! again immediately; the lock is re-acquired per round, so command
//! handlers interleave even under heavy expiry pressure. The sample size
//! bounds the worst-case lock hold.
//!
//! The sampler relies on the process-wide RNG; it is uniform over the
//! live entries and is not reseeded per sweep, so rapid successive
//! sweeps stay unbiased.

use crate::storage::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Configuration for the expiration sweeper.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Interval between sweep cycles (default: 100ms)
    pub interval: Duration,

    /// Maximum entries examined per sweep round (default: 20)
    pub sample_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            sample_size: 20,
        }
    }
}

/// A handle to the running sweeper task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct GcHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl GcHandle {
    /// Starts the sweeper as a background task.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use cinderkv::storage::{Cache, GcConfig, GcHandle};
    /// use std::sync::Arc;
    ///
    /// let cache = Arc::new(Cache::new(0));
    /// let gc = GcHandle::start(Arc::clone(&cache), GcConfig::default());
    ///
    /// // sweeps run in the background until the handle is dropped
    /// drop(gc);
    /// ```
    pub fn start(cache: Arc<Cache>, config: GcConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(gc_loop(cache, config, shutdown_rx));
        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn gc_loop(cache: Arc<Cache>, config: GcConfig, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiration sweeper received shutdown signal");
                    return;
                }
            }
        }

        // one cycle: keep sweeping while more than a quarter of the
        // sampled entries turned out to be expired
        let mut cycle_removed = 0;
        loop {
            let stats = cache.sweep_expired_sample(config.sample_size);
            cycle_removed += stats.removed;
            if stats.removed * 4 <= stats.sampled {
                break;
            }
        }

        if cycle_removed > 0 {
            debug!(
                removed = cycle_removed,
                keys_remaining = cache.len(),
                "expired entries reclaimed"
            );
        }
    }
}

/// Starts the sweeper with default configuration.
pub fn start_gc(cache: Arc<Cache>) -> GcHandle {
    GcHandle::start(cache, GcConfig::default())
}
