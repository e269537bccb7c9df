// Metrics for lock activity
// Records through the `metrics` facade; nothing is exported unless the
// application installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions
/// Call once at startup, after installing a recorder
pub fn describe_metrics() {
    describe_counter!(
        "relock_acquire_total",
        "Total number of lock acquisition attempts, by result"
    );
    describe_counter!(
        "relock_release_total",
        "Total number of lock releases, by outcome"
    );
    describe_counter!(
        "relock_renewal_total",
        "Total number of lease renewals, by result"
    );
    describe_counter!(
        "relock_wait_total",
        "Total number of blocking waits that ended without the lock"
    );
    describe_gauge!(
        "relock_watchdogs_active",
        "Number of lease watchdogs currently running"
    );

    tracing::debug!("Lock metrics described");
}

/// Record one acquisition attempt (`acquired` or `contended`)
pub fn record_acquire(result: &'static str) {
    counter!("relock_acquire_total", "result" => result).increment(1);
}

/// Record one release (`full`, `partial` or `noop`)
pub fn record_release(outcome: &'static str) {
    counter!("relock_release_total", "outcome" => outcome).increment(1);
}

/// Record one renewal (`renewed`, `lost` or `failed`)
pub fn record_renewal(result: &'static str) {
    counter!("relock_renewal_total", "result" => result).increment(1);
}

/// Record a wait that gave up (`timeout` or `cancelled`)
pub fn record_wait_end(reason: &'static str) {
    counter!("relock_wait_total", "reason" => reason).increment(1);
}

/// Move the running-watchdog gauge by one client's change, so the gauge
/// sums every client in the process
pub fn adjust_active_watchdogs(delta: i64) {
    let gauge = gauge!("relock_watchdogs_active");
    if delta >= 0 {
        gauge.increment(delta as f64);
    } else {
        gauge.decrement(delta.unsigned_abs() as f64);
    }
}
