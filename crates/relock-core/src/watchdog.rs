//! Lease watchdog
//!
//! Keeps a held lock alive while its owner is alive: one background task
//! per `(lock, owner)` re-extends the lease every `lease / 3`. The task stops
//! when the owner fully releases, when the client shuts down, or on its own
//! once a renewal reports that the owner no longer holds the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use relock_store::OwnerId;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, trace, warn};

use crate::engine::LockEngine;
use crate::stats::StatsCollector;

type WatchKey = (String, OwnerId);

struct WatchEntry {
    generation: u64,
    lease: Duration,
    handle: JoinHandle<()>,
}

/// Renewal period for a lease. Never zero so a tiny lease cannot spin.
pub fn renewal_period(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(1))
}

pub struct Watchdog {
    engine: Arc<LockEngine>,
    entries: Arc<DashMap<WatchKey, WatchEntry>>,
    stats: Arc<StatsCollector>,
    generations: AtomicU64,
}

impl Watchdog {
    pub(crate) fn new(engine: Arc<LockEngine>, stats: Arc<StatsCollector>) -> Self {
        Self {
            engine,
            entries: Arc::new(DashMap::new()),
            stats,
            generations: AtomicU64::new(0),
        }
    }

    /// Start renewing `name` for `owner`. A running watchdog with the same
    /// lease is kept as is; a different lease replaces it.
    pub fn arm(&self, name: &str, owner: OwnerId, lease: Duration) {
        let key = (name.to_string(), owner);

        if let Some(existing) = self.entries.get(&key)
            && existing.lease == lease
            && !existing.handle.is_finished()
        {
            return;
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(renewal_loop(
            self.engine.clone(),
            self.entries.clone(),
            self.stats.clone(),
            key.clone(),
            generation,
            lease,
        ));

        let previous = self.entries.insert(
            key,
            WatchEntry {
                generation,
                lease,
                handle,
            },
        );
        match previous {
            Some(previous) => previous.handle.abort(),
            None => info!(
                lock = %name,
                owner = %owner,
                lease_ms = lease.as_millis() as u64,
                "Watchdog armed"
            ),
        }

        self.stats.set_active_watchdogs(self.entries.len());
    }

    /// Stop renewing `name` for `owner`. Returns whether a watchdog was running.
    pub fn disarm(&self, name: &str, owner: &OwnerId) -> bool {
        let removed = self.entries.remove(&(name.to_string(), *owner));
        let Some((_, entry)) = removed else {
            return false;
        };

        entry.handle.abort();
        info!(lock = %name, owner = %owner, "Watchdog disarmed");
        self.stats.set_active_watchdogs(self.entries.len());
        true
    }

    /// Stop every watchdog of this client
    pub fn disarm_all(&self) -> usize {
        let mut stopped = 0;
        self.entries.retain(|_, entry| {
            entry.handle.abort();
            stopped += 1;
            false
        });

        if stopped > 0 {
            info!(count = stopped, "All watchdogs disarmed");
        }
        self.stats.set_active_watchdogs(0);
        stopped
    }

    pub fn is_armed(&self, name: &str, owner: &OwnerId) -> bool {
        self.entries
            .get(&(name.to_string(), *owner))
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Renewal tasks hold the entry map; stop them so the lease can lapse.
        self.disarm_all();
    }
}

async fn renewal_loop(
    engine: Arc<LockEngine>,
    entries: Arc<DashMap<WatchKey, WatchEntry>>,
    stats: Arc<StatsCollector>,
    key: WatchKey,
    generation: u64,
    lease: Duration,
) {
    let period = renewal_period(lease);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let (name, owner) = &key;

    loop {
        ticker.tick().await;

        match engine.renew(name, owner, lease).await {
            Ok(true) => {
                trace!(lock = %name, owner = %owner, "Lease renewed");
                stats.record_renewal();
            }
            Ok(false) => {
                warn!(
                    lock = %name,
                    owner = %owner,
                    "Lease lost before renewal, stopping watchdog"
                );
                stats.record_lost_lease();
                entries.remove_if(&key, |_, entry| entry.generation == generation);
                stats.set_active_watchdogs(entries.len());
                break;
            }
            Err(e) => {
                error!(
                    lock = %name,
                    owner = %owner,
                    error = %e,
                    "Lease renewal failed, retrying next period"
                );
                stats.record_renewal_failure();
            }
        }
    }
}
