//! Per-client lock statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::engine::ReleaseOutcome;
use crate::metrics;

/// Snapshot of a client's lock activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    /// Successful acquisitions, reentrant ones included
    pub acquisitions: u64,
    /// Attempts that found the lock held by another owner
    pub contended_attempts: u64,
    pub releases_full: u64,
    pub releases_partial: u64,
    /// Releases by an owner holding nothing
    pub releases_noop: u64,
    pub renewals: u64,
    /// Renewals that hit a store error
    pub renewal_failures: u64,
    /// Watchdogs that found the lock gone or held by someone else
    pub lost_leases: u64,
    pub wait_timeouts: u64,
    pub wait_cancellations: u64,
    /// Watchdogs running right now
    pub active_watchdogs: u64,
}

#[derive(Default)]
pub(crate) struct StatsCollector {
    acquisitions: AtomicU64,
    contended_attempts: AtomicU64,
    releases_full: AtomicU64,
    releases_partial: AtomicU64,
    releases_noop: AtomicU64,
    renewals: AtomicU64,
    renewal_failures: AtomicU64,
    lost_leases: AtomicU64,
    wait_timeouts: AtomicU64,
    wait_cancellations: AtomicU64,
    active_watchdogs: AtomicU64,
}

impl StatsCollector {
    pub fn record_acquired(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        metrics::record_acquire("acquired");
    }

    pub fn record_contended(&self) {
        self.contended_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_acquire("contended");
    }

    pub fn record_release(&self, outcome: ReleaseOutcome) {
        let counter = match outcome {
            ReleaseOutcome::Full => &self.releases_full,
            ReleaseOutcome::Partial => &self.releases_partial,
            ReleaseOutcome::Noop => &self.releases_noop,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_release(outcome.as_str());
    }

    pub fn record_renewal(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
        metrics::record_renewal("renewed");
    }

    pub fn record_renewal_failure(&self) {
        self.renewal_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_renewal("failed");
    }

    pub fn record_lost_lease(&self) {
        self.lost_leases.fetch_add(1, Ordering::Relaxed);
        metrics::record_renewal("lost");
    }

    pub fn record_wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::record_wait_end("timeout");
    }

    pub fn record_wait_cancelled(&self) {
        self.wait_cancellations.fetch_add(1, Ordering::Relaxed);
        metrics::record_wait_end("cancelled");
    }

    /// Record this client's running watchdogs. Returns the change applied to
    /// the process-wide gauge.
    pub fn set_active_watchdogs(&self, count: usize) -> i64 {
        let count = count as u64;
        let previous = self.active_watchdogs.swap(count, Ordering::Relaxed);
        let delta = count as i64 - previous as i64;
        if delta != 0 {
            metrics::adjust_active_watchdogs(delta);
        }
        delta
    }

    pub fn snapshot(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended_attempts: self.contended_attempts.load(Ordering::Relaxed),
            releases_full: self.releases_full.load(Ordering::Relaxed),
            releases_partial: self.releases_partial.load(Ordering::Relaxed),
            releases_noop: self.releases_noop.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            renewal_failures: self.renewal_failures.load(Ordering::Relaxed),
            lost_leases: self.lost_leases.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            wait_cancellations: self.wait_cancellations.load(Ordering::Relaxed),
            active_watchdogs: self.active_watchdogs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = StatsCollector::default();
        stats.record_acquired();
        stats.record_acquired();
        stats.record_contended();
        stats.record_release(ReleaseOutcome::Partial);
        stats.record_release(ReleaseOutcome::Full);
        stats.record_release(ReleaseOutcome::Noop);
        stats.set_active_watchdogs(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.acquisitions, 2);
        assert_eq!(snapshot.contended_attempts, 1);
        assert_eq!(snapshot.releases_partial, 1);
        assert_eq!(snapshot.releases_full, 1);
        assert_eq!(snapshot.releases_noop, 1);
        assert_eq!(snapshot.active_watchdogs, 2);
    }

    #[test]
    fn test_watchdog_gauge_moves_by_each_clients_change() {
        let first = StatsCollector::default();
        let second = StatsCollector::default();

        assert_eq!(first.set_active_watchdogs(3), 3);
        assert_eq!(second.set_active_watchdogs(2), 2);
        assert_eq!(first.set_active_watchdogs(1), -2);
        assert_eq!(second.set_active_watchdogs(2), 0);

        assert_eq!(second.set_active_watchdogs(0), -2);
        assert_eq!(first.snapshot().active_watchdogs, 1);
        assert_eq!(second.snapshot().active_watchdogs, 0);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = LockStats {
            lost_leases: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["lostLeases"], 1);
    }
}
