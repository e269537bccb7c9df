//! Relock Store - Store adapters for the reentrant lease lock
//!
//! This crate provides:
//! - The `LockStore` trait: atomic lock transitions plus per-lock pub/sub
//! - The lock state codec (`LockEntry`, `OwnerId`)
//! - An in-memory store for tests and single-process deployments
//! - A Redis store backed by server-side scripts (feature `redis`)

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

pub mod command;
pub mod memory;
pub mod model;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use command::{AcquireReply, LockCommand, LockCommandResponse, ReleaseReply};
pub use memory::MemoryLockStore;
pub use model::{LockEntry, OwnerId};
#[cfg(feature = "redis")]
pub use redis_store::RedisLockStore;

pub use relock_common::{StoreError, StoreResult};

/// Shared key-value store as seen by the lock
///
/// Implementations must execute each `LockCommand` atomically: no
/// concurrent caller may observe a state in the middle of a transition.
/// Messages are delivered to subscribers active at publish time only.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Run one atomic transition
    async fn execute(&self, command: LockCommand) -> StoreResult<LockCommandResponse>;

    /// Publish `message` on `channel`, returning the number of receivers
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;

    /// Start receiving messages published on `channel`
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}

/// Live subscription to one channel. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    messages: BoxStream<'static, String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, messages: BoxStream<'static, String>) -> Self {
        Self {
            channel: channel.into(),
            messages,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the underlying connection is gone
    pub async fn next_message(&mut self) -> Option<String> {
        self.messages.next().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::trace!(channel = %self.channel, "Unsubscribed");
    }
}
