//! Relock Core - Reentrant lease lock over a shared key-value store
//!
//! This crate provides:
//! - The acquire/release engine: atomic transitions through a `LockStore`
//! - The lease watchdog keeping held locks alive
//! - Wait/notify coordination for contended acquisitions
//! - `LockClient` and the `ReentrantLock` handle
//! - Lock statistics and metrics

pub mod client;
pub mod engine;
pub mod handle;
pub mod metrics;
pub mod stats;
mod waiter;
pub mod watchdog;

pub use client::{AcquireRequest, LockClient};
pub use engine::{AcquireOutcome, LockEngine, ReleaseOutcome};
pub use handle::ReentrantLock;
pub use stats::LockStats;
pub use watchdog::Watchdog;

pub use relock_common::{LockConfig, LockError, LockResult, StoreError, StoreResult};
pub use relock_store::{LockEntry, LockStore, MemoryLockStore, OwnerId, Subscription};
#[cfg(feature = "redis")]
pub use relock_store::RedisLockStore;
