//! Lock client
//!
//! `LockClient` is the entry point of the crate. One client owns one engine,
//! one watchdog registry and one set of stats; cloning it shares them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relock_common::{LockConfig, LockError, LockResult};
use relock_store::{LockEntry, LockStore, OwnerId};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{AcquireOutcome, LockEngine, ReleaseOutcome};
use crate::handle::ReentrantLock;
use crate::stats::{LockStats, StatsCollector};
use crate::waiter::WaitCoordinator;
use crate::watchdog::Watchdog;

/// Parameters of one acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub name: String,
    pub owner: OwnerId,
    /// Lease to grant; the client's default lease when `None`
    pub lease: Option<Duration>,
    /// Longest time to wait for the lock; forever when `None`
    pub wait: Option<Duration>,
    /// Keep the lease alive with a watchdog until released
    pub auto_renew: bool,
}

impl AcquireRequest {
    pub fn new(name: impl Into<String>, owner: OwnerId) -> Self {
        Self {
            name: name.into(),
            owner,
            lease: None,
            wait: None,
            auto_renew: true,
        }
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Hold for exactly `lease` unless released earlier
    pub fn fixed_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self.auto_renew = false;
        self
    }
}

struct ClientInner {
    id: Uuid,
    engine: Arc<LockEngine>,
    watchdog: Watchdog,
    stats: Arc<StatsCollector>,
}

/// Client of the shared lock store
#[derive(Clone)]
pub struct LockClient {
    inner: Arc<ClientInner>,
}

impl LockClient {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> LockResult<Self> {
        config.validate()?;

        let id = Uuid::new_v4();
        let stats = Arc::new(StatsCollector::default());
        let engine = Arc::new(LockEngine::new(store, config));
        let watchdog = Watchdog::new(engine.clone(), stats.clone());

        info!(client_id = %id, "Lock client created");
        Ok(Self {
            inner: Arc::new(ClientInner {
                id,
                engine,
                watchdog,
                stats,
            }),
        })
    }

    /// Client with the default configuration
    pub fn with_store(store: Arc<dyn LockStore>) -> LockResult<Self> {
        Self::new(store, LockConfig::default())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &LockConfig {
        self.inner.engine.config()
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.config().default_lease_ms)
    }

    /// Owner identifier for an explicit holder number within this client
    pub fn owner(&self, holder: u64) -> OwnerId {
        OwnerId::new(self.inner.id, holder)
    }

    /// Owner identifier bound to the calling thread
    pub fn thread_owner(&self) -> OwnerId {
        OwnerId::for_current_thread(self.inner.id)
    }

    /// Handle to the lock `name` using this client's default lease
    pub fn lock(&self, name: impl Into<String>) -> ReentrantLock {
        ReentrantLock::new(self.clone(), name.into(), self.default_lease())
    }

    /// One attempt, never waits. Arms the watchdog on success.
    pub async fn try_acquire(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
    ) -> LockResult<bool> {
        check_lease(lease)?;
        match self.attempt(name, owner, lease).await? {
            AcquireOutcome::Acquired => {
                self.after_acquired(name, owner, lease, true);
                Ok(true)
            }
            AcquireOutcome::Contended { .. } => Ok(false),
        }
    }

    /// Wait as long as it takes
    pub async fn acquire(&self, name: &str, owner: &OwnerId, lease: Duration) -> LockResult<()> {
        self.acquire_with(AcquireRequest::new(name, *owner).lease(lease))
            .await
    }

    /// Wait at most `wait`, then fail with `LockError::Timeout`
    pub async fn acquire_timeout(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
        wait: Duration,
    ) -> LockResult<()> {
        self.acquire_with(AcquireRequest::new(name, *owner).lease(lease).wait(wait))
            .await
    }

    pub async fn acquire_with(&self, request: AcquireRequest) -> LockResult<()> {
        self.acquire_cancellable(request, std::future::pending())
            .await
    }

    /// Like `acquire_with`, but gives up with `LockError::Cancelled` as soon
    /// as `cancel` completes while waiting.
    pub async fn acquire_cancellable<F>(&self, request: AcquireRequest, cancel: F) -> LockResult<()>
    where
        F: Future<Output = ()>,
    {
        let lease = request.lease.unwrap_or_else(|| self.default_lease());
        check_lease(lease)?;

        let name = request.name.as_str();
        let owner = &request.owner;
        let started = Instant::now();

        if let AcquireOutcome::Contended { .. } = self.attempt(name, owner, lease).await? {
            if request.wait == Some(Duration::ZERO) {
                self.inner.stats.record_wait_timeout();
                return Err(LockError::Timeout {
                    name: request.name.clone(),
                    waited: Duration::ZERO,
                });
            }

            // A wait too long to represent as an instant has no deadline
            let deadline = request.wait.and_then(|wait| started.checked_add(wait));
            WaitCoordinator::new(&self.inner.engine, &self.inner.stats)
                .wait(name, owner, lease, deadline, started, cancel)
                .await?;
        }

        self.after_acquired(name, owner, lease, request.auto_renew);
        Ok(())
    }

    /// Drop one count. The watchdog stops once nothing is held.
    pub async fn release(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
    ) -> LockResult<ReleaseOutcome> {
        check_lease(lease)?;
        let outcome = self.inner.engine.try_release(name, owner, lease).await?;
        self.inner.stats.record_release(outcome);

        match outcome {
            ReleaseOutcome::Full | ReleaseOutcome::Noop => {
                self.inner.watchdog.disarm(name, owner);
            }
            ReleaseOutcome::Partial => {}
        }

        Ok(outcome)
    }

    /// Delete the lock whoever holds it and wake its waiters.
    /// Returns whether the lock was held.
    pub async fn force_unlock(&self, name: &str) -> LockResult<bool> {
        let existed = self.inner.engine.force_unlock(name).await?;
        info!(lock = %name, existed = existed, "Lock force unlocked");
        Ok(existed)
    }

    pub async fn inspect(&self, name: &str) -> LockResult<Option<LockEntry>> {
        Ok(self.inner.engine.inspect(name).await?)
    }

    pub async fn is_locked(&self, name: &str) -> LockResult<bool> {
        Ok(self.inspect(name).await?.is_some())
    }

    pub async fn is_held_by(&self, name: &str, owner: &OwnerId) -> LockResult<bool> {
        Ok(self
            .inspect(name)
            .await?
            .is_some_and(|entry| entry.is_held_by(owner)))
    }

    /// Store-side reentry count of `owner`, zero when not held
    pub async fn hold_count(&self, name: &str, owner: &OwnerId) -> LockResult<u32> {
        Ok(self
            .inspect(name)
            .await?
            .map_or(0, |entry| entry.count_for(owner)))
    }

    /// Remaining lease as reported by the store. `None` when the lock is free
    /// or has no expiry.
    pub async fn remaining_ttl(&self, name: &str) -> LockResult<Option<Duration>> {
        Ok(self
            .inspect(name)
            .await?
            .and_then(|entry| entry.remaining_ttl()))
    }

    pub fn is_watchdog_armed(&self, name: &str, owner: &OwnerId) -> bool {
        self.inner.watchdog.is_armed(name, owner)
    }

    pub fn stats(&self) -> LockStats {
        self.inner.stats.snapshot()
    }

    /// Stop every watchdog of this client. Held locks then expire after
    /// their lease unless released.
    pub fn shutdown(&self) {
        let stopped = self.inner.watchdog.disarm_all();
        info!(client_id = %self.inner.id, watchdogs = stopped, "Lock client shut down");
    }

    async fn attempt(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
    ) -> LockResult<AcquireOutcome> {
        let outcome = self.inner.engine.try_acquire(name, owner, lease).await?;
        match outcome {
            AcquireOutcome::Acquired => self.inner.stats.record_acquired(),
            AcquireOutcome::Contended { .. } => self.inner.stats.record_contended(),
        }
        Ok(outcome)
    }

    fn after_acquired(&self, name: &str, owner: &OwnerId, lease: Duration, auto_renew: bool) {
        if auto_renew && self.config().watchdog_enabled {
            self.inner.watchdog.arm(name, *owner, lease);
        } else {
            debug!(lock = %name, owner = %owner, "Acquired without watchdog");
        }
    }
}

impl std::fmt::Debug for LockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockClient")
            .field("id", &self.inner.id)
            .field("watchdogs", &self.inner.watchdog.active_count())
            .finish()
    }
}

fn check_lease(lease: Duration) -> LockResult<()> {
    if lease.is_zero() {
        return Err(LockError::InvalidArgument(
            "lease must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
