//! Relock Common - Shared types and constants
//!
//! This crate provides the foundational types used across all Relock components:
//! - Error types for store interaction and lock outcomes
//! - Client configuration loaded from files and environment
//! - Wire constants shared by every store adapter

pub mod config;
pub mod error;

// Re-exports for convenience
pub use config::LockConfig;
pub use error::{LockError, LockResult, StoreError, StoreResult};

/// Default lease applied when the caller does not pass one (30 seconds)
pub const DEFAULT_LEASE_MS: u64 = 30_000;

/// Default prefix of the per-lock release channel
pub const DEFAULT_CHANNEL_PREFIX: &str = "relock__channel";

/// Message published on a lock's channel when its last holder releases it
pub const UNLOCK_MESSAGE: &str = "0";

/// Smallest wait window between two acquisition attempts, in milliseconds
pub const DEFAULT_MIN_RETRY_INTERVAL_MS: u64 = 10;
