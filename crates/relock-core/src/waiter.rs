//! Wait/notify coordination for contended acquisitions
//!
//! A waiter subscribes to the lock's release channel before it retries, so a
//! release that happens between the failed attempt and the subscription is
//! still observed by the retry that follows. Between attempts it sleeps until
//! whichever comes first: a release notification, the holder's remaining ttl,
//! the caller's deadline, or cancellation.

use std::future::Future;
use std::time::Duration;

use relock_common::{LockError, LockResult, StoreError};
use relock_store::OwnerId;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::engine::{AcquireOutcome, LockEngine};
use crate::stats::StatsCollector;

pub(crate) struct WaitCoordinator<'a> {
    engine: &'a LockEngine,
    stats: &'a StatsCollector,
    min_retry: Duration,
}

impl<'a> WaitCoordinator<'a> {
    pub fn new(engine: &'a LockEngine, stats: &'a StatsCollector) -> Self {
        let min_retry = Duration::from_millis(engine.config().min_retry_interval_ms.max(1));
        Self {
            engine,
            stats,
            min_retry,
        }
    }

    /// Block until `owner` holds `name`, the deadline passes, or `cancel`
    /// completes. `started` is when the caller began its acquisition.
    pub async fn wait<F>(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
        deadline: Option<Instant>,
        started: Instant,
        cancel: F,
    ) -> LockResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let mut subscription = self.engine.subscribe(name).await?;
        debug!(lock = %name, owner = %owner, channel = %subscription.channel(), "Waiting for lock");

        loop {
            let remaining_ttl = match self.engine.try_acquire(name, owner, lease).await? {
                AcquireOutcome::Acquired => {
                    self.stats.record_acquired();
                    return Ok(());
                }
                AcquireOutcome::Contended { remaining_ttl } => {
                    self.stats.record_contended();
                    remaining_ttl
                }
            };

            let mut window = remaining_ttl.unwrap_or(lease).max(self.min_retry);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    self.stats.record_wait_timeout();
                    debug!(lock = %name, owner = %owner, "Wait timed out");
                    return Err(LockError::Timeout {
                        name: name.to_string(),
                        waited: now.duration_since(started),
                    });
                }
                window = window.min(deadline - now);
            }

            tokio::select! {
                biased;

                _ = &mut cancel => {
                    self.stats.record_wait_cancelled();
                    debug!(lock = %name, owner = %owner, "Wait cancelled");
                    return Err(LockError::Cancelled {
                        name: name.to_string(),
                    });
                }
                message = subscription.next_message() => match message {
                    Some(_) => trace!(lock = %name, "Release notification received"),
                    None => {
                        return Err(
                            StoreError::SubscriptionClosed(subscription.channel().to_string())
                                .into(),
                        );
                    }
                },
                _ = tokio::time::sleep(window) => {
                    trace!(lock = %name, window_ms = window.as_millis() as u64, "Wait window elapsed");
                }
            }
        }
    }
}
