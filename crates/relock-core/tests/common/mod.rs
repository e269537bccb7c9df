//! Common test utilities for lock integration tests
//!
//! Every client built here shares one in-memory store, which stands in for
//! the shared key-value store seen by separate processes.

use std::sync::Arc;
use std::time::Duration;

use relock_core::{LockClient, LockConfig, MemoryLockStore};
use tracing_subscriber::EnvFilter;

/// Lock name used by most tests
pub const RESOURCE: &str = "res";

/// Install a test subscriber once; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_store() -> Arc<MemoryLockStore> {
    init_tracing();
    Arc::new(MemoryLockStore::new())
}

/// A fresh client (a separate "process") on `store`
pub fn client_on(store: &Arc<MemoryLockStore>) -> LockClient {
    LockClient::with_store(store.clone()).expect("default config is valid")
}

#[allow(dead_code)]
pub fn client_with_config(store: &Arc<MemoryLockStore>, config: LockConfig) -> LockClient {
    LockClient::new(store.clone(), config).expect("test config is valid")
}

/// Channel carrying release notifications of `name` under the default config
#[allow(dead_code)]
pub fn channel_of(name: &str) -> String {
    LockConfig::default().channel_name(name)
}

/// Sleep in small steps until `store` has `count` subscribers on `channel`
#[allow(dead_code)]
pub async fn wait_for_subscribers(store: &MemoryLockStore, channel: &str, count: usize) {
    while store.subscriber_count(channel) < count {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
