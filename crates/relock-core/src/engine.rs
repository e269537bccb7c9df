//! Acquire/release engine
//!
//! Thin typed layer over `LockStore::execute`: each call is exactly one
//! atomic store round trip, never a read followed by a write.

use std::sync::Arc;
use std::time::Duration;

use relock_common::{LockConfig, StoreError, StoreResult};
use relock_store::{
    AcquireReply, LockCommand, LockCommandResponse, LockEntry, LockStore, OwnerId, ReleaseReply,
    Subscription,
};
use tracing::debug;

/// Result of one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// Held by another owner. `remaining_ttl` bounds how long to wait before retrying.
    Contended { remaining_ttl: Option<Duration> },
}

/// Result of one release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The owner held nothing; the store was left untouched
    Noop,
    /// One count dropped, the owner still holds the lock
    Partial,
    /// Last count dropped, the lock is free and waiters were notified
    Full,
}

impl ReleaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseOutcome::Noop => "noop",
            ReleaseOutcome::Partial => "partial",
            ReleaseOutcome::Full => "full",
        }
    }
}

impl From<ReleaseReply> for ReleaseOutcome {
    fn from(reply: ReleaseReply) -> Self {
        match reply {
            ReleaseReply::Noop => ReleaseOutcome::Noop,
            ReleaseReply::Partial => ReleaseOutcome::Partial,
            ReleaseReply::Full => ReleaseOutcome::Full,
        }
    }
}

/// Runs the lock transitions against one store
pub struct LockEngine {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl LockEngine {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn channel_name(&self, name: &str) -> String {
        self.config.channel_name(name)
    }

    pub async fn try_acquire(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
    ) -> StoreResult<AcquireOutcome> {
        let command = LockCommand::TryAcquire {
            key: self.config.lock_key(name),
            owner: owner.to_string(),
            lease_ms: lease_ms(lease),
        };

        match self.store.execute(command).await? {
            LockCommandResponse::Acquire(AcquireReply::Acquired) => {
                debug!(lock = %name, owner = %owner, "Lock acquired");
                Ok(AcquireOutcome::Acquired)
            }
            LockCommandResponse::Acquire(AcquireReply::Contended { ttl_ms }) => {
                debug!(lock = %name, owner = %owner, ttl_ms = ?ttl_ms, "Lock contended");
                Ok(AcquireOutcome::Contended {
                    remaining_ttl: ttl_ms.map(Duration::from_millis),
                })
            }
            other => Err(unexpected("try_acquire", &other)),
        }
    }

    pub async fn try_release(
        &self,
        name: &str,
        owner: &OwnerId,
        lease: Duration,
    ) -> StoreResult<ReleaseOutcome> {
        let command = LockCommand::Release {
            key: self.config.lock_key(name),
            channel: self.channel_name(name),
            owner: owner.to_string(),
            lease_ms: lease_ms(lease),
        };

        match self.store.execute(command).await? {
            LockCommandResponse::Release(reply) => {
                let outcome = ReleaseOutcome::from(reply);
                debug!(lock = %name, owner = %owner, outcome = outcome.as_str(), "Lock released");
                Ok(outcome)
            }
            other => Err(unexpected("release", &other)),
        }
    }

    /// Extend the lease if `owner` still holds `name`
    pub async fn renew(&self, name: &str, owner: &OwnerId, lease: Duration) -> StoreResult<bool> {
        let command = LockCommand::Renew {
            key: self.config.lock_key(name),
            owner: owner.to_string(),
            lease_ms: lease_ms(lease),
        };

        match self.store.execute(command).await? {
            LockCommandResponse::Renew { renewed } => Ok(renewed),
            other => Err(unexpected("renew", &other)),
        }
    }

    pub async fn force_unlock(&self, name: &str) -> StoreResult<bool> {
        let command = LockCommand::ForceUnlock {
            key: self.config.lock_key(name),
            channel: self.channel_name(name),
        };

        match self.store.execute(command).await? {
            LockCommandResponse::ForceUnlock { existed } => Ok(existed),
            other => Err(unexpected("force_unlock", &other)),
        }
    }

    pub async fn inspect(&self, name: &str) -> StoreResult<Option<LockEntry>> {
        let command = LockCommand::Inspect {
            key: self.config.lock_key(name),
        };

        match self.store.execute(command).await? {
            LockCommandResponse::Inspect(entry) => Ok(entry),
            other => Err(unexpected("inspect", &other)),
        }
    }

    pub async fn subscribe(&self, name: &str) -> StoreResult<Subscription> {
        self.store.subscribe(&self.channel_name(name)).await
    }
}

fn lease_ms(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn unexpected(command: &'static str, response: &LockCommandResponse) -> StoreError {
    StoreError::UnexpectedReply {
        command,
        reply: response.describe(),
    }
}
