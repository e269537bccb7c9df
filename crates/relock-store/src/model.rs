//! Lock state model and codec
//!
//! A lock lives in the store as one hash keyed by the lock name. Each field
//! is an owner identifier and its value is that owner's reentry count. One
//! expiry covers the whole hash.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use relock_common::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one logical lock holder: the client instance plus a holder
/// number inside it (usually a thread or task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId {
    client_id: Uuid,
    holder: u64,
}

impl OwnerId {
    pub fn new(client_id: Uuid, holder: u64) -> Self {
        Self { client_id, holder }
    }

    /// Owner bound to the calling OS thread
    pub fn for_current_thread(client_id: Uuid) -> Self {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        Self::new(client_id, hasher.finish())
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn holder(&self) -> u64 {
        self.holder
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client_id, self.holder)
    }
}

impl FromStr for OwnerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (client, holder) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid owner id: {}", s))?;
        let client_id =
            Uuid::parse_str(client).map_err(|e| format!("Invalid owner id {}: {}", s, e))?;
        let holder = holder
            .parse::<u64>()
            .map_err(|e| format!("Invalid owner id {}: {}", s, e))?;
        Ok(Self::new(client_id, holder))
    }
}

/// Decoded view of one lock entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Store key of the entry
    pub name: String,
    /// Owner id (as stored) -> reentry count
    pub holders: BTreeMap<String, u32>,
    /// Remaining time to live as reported by the store, `None` if the entry has no expiry
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl LockEntry {
    /// Build a decoded entry from raw hash fields and a `PTTL`-style reply.
    ///
    /// `pttl` follows the store convention: `-2` when the key does not
    /// exist, `-1` when it exists without an expiry, otherwise milliseconds.
    pub fn decode<I>(name: &str, fields: I, pttl: i64) -> StoreResult<Option<Self>>
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        let ttl_ms = match pttl {
            -2 => return Ok(None),
            -1 => None,
            ms if ms >= 0 => Some(ms as u64),
            other => {
                return Err(codec_error(name, format!("invalid remaining ttl {}", other)));
            }
        };

        let mut holders = BTreeMap::new();
        for (owner, count) in fields {
            if count <= 0 || count > i64::from(u32::MAX) {
                return Err(codec_error(
                    name,
                    format!("holder {} has invalid count {}", owner, count),
                ));
            }
            holders.insert(owner, count as u32);
        }

        if holders.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            name: name.to_string(),
            holders,
            ttl_ms,
        }))
    }

    /// Raw hash fields for this entry
    pub fn encode(&self) -> Vec<(String, i64)> {
        self.holders
            .iter()
            .map(|(owner, count)| (owner.clone(), i64::from(*count)))
            .collect()
    }

    /// Reentry count held by `owner`, zero when it is not a holder
    pub fn count_for(&self, owner: &OwnerId) -> u32 {
        self.holders
            .get(&owner.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn is_held_by(&self, owner: &OwnerId) -> bool {
        self.count_for(owner) > 0
    }

    /// The current holder, if its stored id parses as an `OwnerId`
    pub fn owner(&self) -> Option<OwnerId> {
        self.holders.keys().next().and_then(|o| o.parse().ok())
    }

    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

fn codec_error(name: &str, reason: String) -> StoreError {
    StoreError::Codec {
        key: name.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn owner(holder: u64) -> OwnerId {
        OwnerId::new(Uuid::from_u128(0x1234), holder)
    }

    #[test]
    fn test_owner_id_display() {
        let id = owner(7);
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000001234:7");
        assert_eq!(id.to_string().parse::<OwnerId>().unwrap(), id);
    }

    #[test]
    fn test_owner_id_rejects_garbage() {
        assert!("no-separator".parse::<OwnerId>().is_err());
        assert!("not-a-uuid:1".parse::<OwnerId>().is_err());
        assert!("00000000-0000-0000-0000-000000001234:x".parse::<OwnerId>().is_err());
    }

    #[test]
    fn test_thread_owner_is_stable_per_thread() {
        let client = Uuid::new_v4();
        let a = OwnerId::for_current_thread(client);
        let b = OwnerId::for_current_thread(client);
        assert_eq!(a, b);

        let other = std::thread::spawn(move || OwnerId::for_current_thread(client))
            .join()
            .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_decode_missing_key() {
        let entry = LockEntry::decode("res", Vec::new(), -2).unwrap();
        assert!(entry.is_none());
    }

    #[test]
    fn test_decode_held_entry() {
        let holder = owner(1);
        let entry = LockEntry::decode("res", vec![(holder.to_string(), 2)], 1500)
            .unwrap()
            .unwrap();

        assert_eq!(entry.count_for(&holder), 2);
        assert_eq!(entry.count_for(&owner(2)), 0);
        assert!(entry.is_held_by(&holder));
        assert_eq!(entry.owner(), Some(holder));
        assert_eq!(entry.remaining_ttl(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_decode_without_expiry() {
        let entry = LockEntry::decode("res", vec![(owner(1).to_string(), 1)], -1)
            .unwrap()
            .unwrap();
        assert_eq!(entry.ttl_ms, None);
    }

    #[test]
    fn test_decode_rejects_non_positive_count() {
        let err = LockEntry::decode("res", vec![(owner(1).to_string(), 0)], 100).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_ttl() {
        let err = LockEntry::decode("res", vec![(owner(1).to_string(), 1)], -7).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }

    #[test]
    fn test_json_shape() {
        let entry = LockEntry::decode("res", vec![(owner(3).to_string(), 1)], 250)
            .unwrap()
            .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "res");
        assert_eq!(json["ttl_ms"], 250);
        assert_eq!(json["holders"][owner(3).to_string()], 1);
    }

    proptest! {
        #[test]
        fn prop_owner_id_parses_its_display(raw in any::<u128>(), holder in any::<u64>()) {
            let id = OwnerId::new(Uuid::from_u128(raw), holder);
            prop_assert_eq!(id.to_string().parse::<OwnerId>().unwrap(), id);
        }

        #[test]
        fn prop_encode_preserves_counts(count in 1u32..=u32::MAX, ttl in 0i64..86_400_000) {
            let holder = owner(9);
            let entry = LockEntry::decode("res", vec![(holder.to_string(), i64::from(count))], ttl)
                .unwrap()
                .unwrap();
            let again = LockEntry::decode("res", entry.encode(), ttl).unwrap().unwrap();
            prop_assert_eq!(again.count_for(&holder), count);
            prop_assert_eq!(again, entry);
        }
    }
}
