//! Error types for Relock
//!
//! This module defines:
//! - `StoreError`: failures talking to the shared key-value store
//! - `LockError`: outcomes of a lock call that are not a successful acquisition

use std::time::Duration;

/// Failures reported by a store adapter
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("atomic script failed: {0}")]
    Script(String),

    #[error("unexpected store reply for {command}: {reply}")]
    UnexpectedReply { command: &'static str, reply: String },

    #[error("malformed lock entry '{key}': {reason}")]
    Codec { key: String, reason: String },

    #[error("subscription to '{0}' closed")]
    SubscriptionClosed(String),
}

/// Errors returned by the lock client
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    Timeout { name: String, waited: Duration },

    #[error("wait for lock '{name}' was cancelled")]
    Cancelled { name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LockError::Cancelled { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self, LockError::Store(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type LockResult<T> = Result<T, LockError>;
