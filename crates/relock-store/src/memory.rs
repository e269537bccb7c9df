//! In-memory lock store
//!
//! Behaves like a single store node: hash entries with a per-key expiry,
//! transitions executed under the key's shard lock, and fan-out channels for
//! release notifications. Expiry is judged by this store's own clock only.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::{Instant, interval};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use relock_common::{StoreError, StoreResult, UNLOCK_MESSAGE};

use super::command::{AcquireReply, LockCommand, LockCommandResponse, ReleaseReply};
use super::model::LockEntry;
use super::{LockStore, Subscription};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A stored hash with its expiry
struct StoredHash {
    fields: HashMap<String, i64>,
    expires_at: Option<Instant>,
}

impl StoredHash {
    fn held_by(owner: &str, expires_at: Instant) -> Self {
        Self {
            fields: HashMap::from([(owner.to_string(), 1)]),
            expires_at: Some(expires_at),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Remaining ttl in `PTTL` convention (-1 when no expiry is set)
    fn pttl(&self, now: Instant) -> i64 {
        match self.expires_at {
            Some(at) => at.saturating_duration_since(now).as_millis() as i64,
            None => -1,
        }
    }
}

/// In-memory store implementation
/// Share one instance (behind an `Arc`) between clients to model one store
pub struct MemoryLockStore {
    keys: Arc<DashMap<String, StoredHash>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    available: AtomicBool,
    /// Background expiry sweeper, aborted with the store
    _cleanup: Option<CleanupTask>,
}

struct CleanupTask(tokio::task::JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            available: AtomicBool::new(true),
            _cleanup: None,
        }
    }

    /// Start with a background task that evicts expired entries.
    ///
    /// Expired entries are already invisible to every command, the sweeper
    /// only reclaims their memory.
    pub fn with_cleanup(self, interval_ms: u64) -> Self {
        let keys = self.keys.clone();
        let channels = self.channels.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval(Duration::from_millis(interval_ms.max(1)));
            loop {
                interval.tick().await;
                Self::cleanup_expired(&keys, &channels);
            }
        });

        Self {
            keys: self.keys,
            channels: self.channels,
            available: self.available,
            _cleanup: Some(CleanupTask(handle)),
        }
    }

    fn cleanup_expired(
        keys: &DashMap<String, StoredHash>,
        channels: &DashMap<String, broadcast::Sender<String>>,
    ) {
        let now = Instant::now();
        let before = keys.len();
        keys.retain(|_, hash| !hash.is_expired(now));
        channels.retain(|_, sender| sender.receiver_count() > 0);

        let evicted = before.saturating_sub(keys.len());
        if evicted > 0 {
            debug!(count = evicted, "Evicted expired lock entries");
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    /// Stored entries are kept across an outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Whether `key` exists and has not expired
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.keys
            .get(key)
            .is_some_and(|hash| !hash.is_expired(now))
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn try_acquire(&self, key: &str, owner: &str, lease_ms: u64) -> AcquireReply {
        let now = Instant::now();
        let expires_at = now + Duration::from_millis(lease_ms);

        match self.keys.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(StoredHash::held_by(owner, expires_at));
                AcquireReply::Acquired
            }
            Entry::Occupied(mut occupied) => {
                let hash = occupied.get_mut();
                if hash.is_expired(now) {
                    *hash = StoredHash::held_by(owner, expires_at);
                    return AcquireReply::Acquired;
                }
                match hash.fields.get_mut(owner) {
                    Some(count) => {
                        *count += 1;
                        hash.expires_at = Some(expires_at);
                        AcquireReply::Acquired
                    }
                    None => {
                        let pttl = hash.pttl(now);
                        AcquireReply::Contended {
                            ttl_ms: (pttl >= 0).then_some(pttl as u64),
                        }
                    }
                }
            }
        }
    }

    fn release(&self, key: &str, channel: &str, owner: &str, lease_ms: u64) -> ReleaseReply {
        let now = Instant::now();

        let reply = match self.keys.entry(key.to_string()) {
            Entry::Vacant(_) => ReleaseReply::Noop,
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    ReleaseReply::Noop
                } else {
                    let hash = occupied.get_mut();
                    match hash.fields.get_mut(owner) {
                        None => ReleaseReply::Noop,
                        Some(count) => {
                            *count -= 1;
                            if *count > 0 {
                                hash.expires_at = Some(now + Duration::from_millis(lease_ms));
                                ReleaseReply::Partial
                            } else {
                                occupied.remove();
                                ReleaseReply::Full
                            }
                        }
                    }
                }
            }
        };

        if reply == ReleaseReply::Full {
            self.publish_local(channel, UNLOCK_MESSAGE);
        }
        reply
    }

    fn renew(&self, key: &str, owner: &str, lease_ms: u64) -> bool {
        let now = Instant::now();

        match self.keys.entry(key.to_string()) {
            Entry::Vacant(_) => false,
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    return false;
                }
                let hash = occupied.get_mut();
                if hash.fields.contains_key(owner) {
                    hash.expires_at = Some(now + Duration::from_millis(lease_ms));
                    true
                } else {
                    false
                }
            }
        }
    }

    fn force_unlock(&self, key: &str, channel: &str) -> bool {
        let now = Instant::now();
        let existed = self
            .keys
            .remove(key)
            .is_some_and(|(_, hash)| !hash.is_expired(now));

        if existed {
            self.publish_local(channel, UNLOCK_MESSAGE);
        }
        existed
    }

    fn inspect(&self, key: &str) -> StoreResult<Option<LockEntry>> {
        let now = Instant::now();

        let snapshot = self.keys.get(key).map(|hash| {
            (
                hash.is_expired(now),
                hash.fields
                    .iter()
                    .map(|(owner, count)| (owner.clone(), *count))
                    .collect::<Vec<_>>(),
                hash.pttl(now),
            )
        });

        match snapshot {
            None => Ok(None),
            Some((true, _, _)) => {
                self.keys.remove_if(key, |_, hash| hash.is_expired(now));
                Ok(None)
            }
            Some((false, fields, pttl)) => LockEntry::decode(key, fields, pttl),
        }
    }

    fn publish_local(&self, channel: &str, message: &str) -> usize {
        let delivered = self
            .channels
            .get(channel)
            .map(|sender| sender.send(message.to_string()).unwrap_or(0))
            .unwrap_or(0);

        if delivered == 0 {
            self.channels
                .remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn execute(&self, command: LockCommand) -> StoreResult<LockCommandResponse> {
        self.ensure_available()?;

        let response = match command {
            LockCommand::TryAcquire {
                key,
                owner,
                lease_ms,
            } => LockCommandResponse::Acquire(self.try_acquire(&key, &owner, lease_ms)),
            LockCommand::Release {
                key,
                channel,
                owner,
                lease_ms,
            } => LockCommandResponse::Release(self.release(&key, &channel, &owner, lease_ms)),
            LockCommand::Renew {
                key,
                owner,
                lease_ms,
            } => LockCommandResponse::Renew {
                renewed: self.renew(&key, &owner, lease_ms),
            },
            LockCommand::ForceUnlock { key, channel } => LockCommandResponse::ForceUnlock {
                existed: self.force_unlock(&key, &channel),
            },
            LockCommand::Inspect { key } => LockCommandResponse::Inspect(self.inspect(&key)?),
        };

        Ok(response)
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        self.ensure_available()?;
        Ok(self.publish_local(channel, message))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.ensure_available()?;

        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0)
            .subscribe();

        // A lagged receiver missed at least one release, which is still a wake-up
        let messages = BroadcastStream::new(receiver)
            .map(|item| match item {
                Ok(message) => message,
                Err(BroadcastStreamRecvError::Lagged(_)) => UNLOCK_MESSAGE.to_string(),
            })
            .boxed();

        Ok(Subscription::new(channel, messages))
    }
}
