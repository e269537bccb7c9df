//! Reentrant lock handle
//!
//! `ReentrantLock` binds a client to one lock name and lease. It mirrors the
//! store-side reentry count per owner in a local depth table; the store stays
//! authoritative and the table only serves callers and sanity checks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relock_common::LockResult;
use relock_store::OwnerId;
use tracing::warn;

use crate::client::{AcquireRequest, LockClient};
use crate::engine::ReleaseOutcome;

#[derive(Clone)]
pub struct ReentrantLock {
    client: LockClient,
    name: String,
    lease: Duration,
    depths: Arc<Mutex<HashMap<OwnerId, u32>>>,
}

impl ReentrantLock {
    pub(crate) fn new(client: LockClient, name: String, lease: Duration) -> Self {
        Self {
            client,
            name,
            lease,
            depths: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Same lock with a different lease. The depth table is shared.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub async fn acquire(&self, owner: &OwnerId) -> LockResult<()> {
        self.client.acquire(&self.name, owner, self.lease).await?;
        self.enter(owner);
        Ok(())
    }

    pub async fn acquire_timeout(&self, owner: &OwnerId, wait: Duration) -> LockResult<()> {
        self.client
            .acquire_timeout(&self.name, owner, self.lease, wait)
            .await?;
        self.enter(owner);
        Ok(())
    }

    pub async fn acquire_cancellable<F>(
        &self,
        owner: &OwnerId,
        wait: Option<Duration>,
        cancel: F,
    ) -> LockResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut request = AcquireRequest::new(self.name.clone(), *owner).lease(self.lease);
        request.wait = wait;
        self.client.acquire_cancellable(request, cancel).await?;
        self.enter(owner);
        Ok(())
    }

    pub async fn try_acquire(&self, owner: &OwnerId) -> LockResult<bool> {
        let acquired = self
            .client
            .try_acquire(&self.name, owner, self.lease)
            .await?;
        if acquired {
            self.enter(owner);
        }
        Ok(acquired)
    }

    /// Release one level. Releasing more often than acquired is a no-op.
    pub async fn release(&self, owner: &OwnerId) -> LockResult<ReleaseOutcome> {
        let outcome = self.client.release(&self.name, owner, self.lease).await?;

        let mut depths = self.depths.lock();
        let local = depths.get(owner).copied().unwrap_or(0);
        match outcome {
            ReleaseOutcome::Partial => {
                if local <= 1 {
                    warn!(
                        lock = %self.name,
                        owner = %owner,
                        local_depth = local,
                        "Store still holds the lock but local depth is exhausted"
                    );
                }
                depths.insert(*owner, local.saturating_sub(1).max(1));
            }
            ReleaseOutcome::Full => {
                if local > 1 {
                    warn!(
                        lock = %self.name,
                        owner = %owner,
                        local_depth = local,
                        "Lock fully released with local depth remaining"
                    );
                }
                depths.remove(owner);
            }
            ReleaseOutcome::Noop => {
                if local > 0 {
                    warn!(
                        lock = %self.name,
                        owner = %owner,
                        local_depth = local,
                        "Lock was lost before release"
                    );
                }
                depths.remove(owner);
            }
        }

        Ok(outcome)
    }

    /// Depth recorded by this handle for `owner`
    pub fn local_depth(&self, owner: &OwnerId) -> u32 {
        self.depths.lock().get(owner).copied().unwrap_or(0)
    }

    /// Authoritative depth from the store
    pub async fn hold_count(&self, owner: &OwnerId) -> LockResult<u32> {
        self.client.hold_count(&self.name, owner).await
    }

    pub async fn is_locked(&self) -> LockResult<bool> {
        self.client.is_locked(&self.name).await
    }

    pub async fn is_held_by(&self, owner: &OwnerId) -> LockResult<bool> {
        self.client.is_held_by(&self.name, owner).await
    }

    pub async fn force_unlock(&self) -> LockResult<bool> {
        let existed = self.client.force_unlock(&self.name).await?;
        self.depths.lock().clear();
        Ok(existed)
    }

    fn enter(&self, owner: &OwnerId) {
        *self.depths.lock().entry(*owner).or_insert(0) += 1;
    }
}

impl std::fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("name", &self.name)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relock_store::MemoryLockStore;

    fn lock() -> ReentrantLock {
        LockClient::with_store(Arc::new(MemoryLockStore::new()))
            .unwrap()
            .lock("res")
    }

    #[tokio::test]
    async fn test_local_depth_mirrors_store_count() {
        let lock = lock();
        let owner = lock.client.owner(1);

        lock.acquire(&owner).await.unwrap();
        lock.acquire(&owner).await.unwrap();
        assert!(lock.try_acquire(&owner).await.unwrap());
        assert_eq!(lock.local_depth(&owner), 3);
        assert_eq!(lock.hold_count(&owner).await.unwrap(), 3);

        assert_eq!(lock.release(&owner).await.unwrap(), ReleaseOutcome::Partial);
        assert_eq!(lock.local_depth(&owner), 2);
        assert_eq!(lock.release(&owner).await.unwrap(), ReleaseOutcome::Partial);
        assert_eq!(lock.release(&owner).await.unwrap(), ReleaseOutcome::Full);
        assert_eq!(lock.local_depth(&owner), 0);
        assert!(!lock.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_extra_release_is_noop() {
        let lock = lock();
        let owner = lock.client.owner(1);

        lock.acquire(&owner).await.unwrap();
        assert_eq!(lock.release(&owner).await.unwrap(), ReleaseOutcome::Full);
        assert_eq!(lock.release(&owner).await.unwrap(), ReleaseOutcome::Noop);
        assert_eq!(lock.local_depth(&owner), 0);
    }

    #[tokio::test]
    async fn test_force_unlock_clears_depths() {
        let lock = lock();
        let owner = lock.client.owner(1);

        lock.acquire(&owner).await.unwrap();
        assert!(lock.force_unlock().await.unwrap());
        assert_eq!(lock.local_depth(&owner), 0);
        assert!(!lock.force_unlock().await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lease_shares_depths() {
        let lock = lock();
        let short = lock.clone().with_lease(Duration::from_secs(5));
        let owner = lock.client.owner(1);

        short.acquire(&owner).await.unwrap();
        assert_eq!(short.lease(), Duration::from_secs(5));
        assert_eq!(lock.local_depth(&owner), 1);
        assert_eq!(lock.name(), "res");
    }
}
