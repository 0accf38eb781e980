//! Expiry of unused registrations
//!
//! Each replica purges on its own schedule from its own view of `last_used`.
//! Purges are not replicated.

use crate::registry::{now, RegistryStore, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodically evicts nicks that have not been used within the expiry window
pub struct ExpirySweeper {
    store: Arc<RegistryStore>,
    /// Zero disables expiry
    window: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper over `store`
    pub fn new(store: Arc<RegistryStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// The configured expiry window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Sweep using the wall clock
    pub fn sweep(&self) -> usize {
        self.sweep_at(now())
    }

    /// Purge every record whose `last_used` is older than `now - window`.
    /// Returns the number purged.
    pub fn sweep_at(&self, now: Timestamp) -> usize {
        if self.window.is_zero() {
            return 0;
        }
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(window);

        let candidates = self.store.stale_names(cutoff);
        let purged = candidates
            .iter()
            .filter(|name| self.store.purge_if_stale(name, cutoff))
            .count();

        if purged > 0 {
            info!("Expired {} registered nicks (cutoff {})", purged, cutoff);
        } else {
            debug!("Expiry sweep found nothing older than {}", cutoff);
        }
        purged
    }

    /// Sweep every `period` until `shutdown` flips to true or its sender goes away
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        if period.is_zero() {
            warn!("Expiry sweeper not started: sweep period is zero");
            return;
        }
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Expiry sweeper started, window {:?}, period {:?}", self.window, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }
}
