//! Atomic lock transitions understood by every store adapter
//!
//! Each command is executed by the store as one indivisible unit. The
//! Redis adapter maps them onto server-side scripts, the in-memory adapter
//! runs them under the key's shard lock.

use serde::{Deserialize, Serialize};

use super::model::LockEntry;

/// An atomic transition against one lock entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockCommand {
    /// Create the entry or bump `owner`'s count, refreshing the expiry
    TryAcquire {
        key: String,
        owner: String,
        lease_ms: u64,
    },
    /// Drop one count of `owner`; delete and publish once the count reaches zero
    Release {
        key: String,
        channel: String,
        owner: String,
        lease_ms: u64,
    },
    /// Refresh the expiry if `owner` still holds the entry
    Renew {
        key: String,
        owner: String,
        lease_ms: u64,
    },
    /// Delete the entry whoever holds it and publish
    ForceUnlock { key: String, channel: String },
    /// Read holders and remaining expiry in one round trip
    Inspect { key: String },
}

impl LockCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LockCommand::TryAcquire { .. } => "try_acquire",
            LockCommand::Release { .. } => "release",
            LockCommand::Renew { .. } => "renew",
            LockCommand::ForceUnlock { .. } => "force_unlock",
            LockCommand::Inspect { .. } => "inspect",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            LockCommand::TryAcquire { key, .. }
            | LockCommand::Release { key, .. }
            | LockCommand::Renew { key, .. }
            | LockCommand::ForceUnlock { key, .. }
            | LockCommand::Inspect { key } => key,
        }
    }
}

/// Reply of a `TryAcquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireReply {
    Acquired,
    /// Held by another owner; carries the entry's remaining ttl (`None` if it has no expiry)
    Contended { ttl_ms: Option<u64> },
}

/// Reply of a `Release`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReply {
    /// The owner held no count, nothing changed
    Noop,
    /// Count decremented and still positive, expiry refreshed
    Partial,
    /// Last count dropped, entry deleted, notification published
    Full,
}

/// Reply to a `LockCommand`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockCommandResponse {
    Acquire(AcquireReply),
    Release(ReleaseReply),
    Renew { renewed: bool },
    ForceUnlock { existed: bool },
    Inspect(Option<LockEntry>),
}

impl LockCommandResponse {
    pub fn describe(&self) -> String {
        format!("{:?}", self)
    }
}
