//! Redis lock store
//!
//! Every transition is one Lua script, so Redis executes it atomically.
//! The entry is a hash `owner -> count` with a single `PEXPIRE` on the key,
//! and release notifications go out with `PUBLISH` from inside the script.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::debug;

use relock_common::{StoreError, StoreResult, UNLOCK_MESSAGE};

use super::command::{AcquireReply, LockCommand, LockCommandResponse, ReleaseReply};
use super::model::LockEntry;
use super::{LockStore, Subscription};

/// KEYS[1] lock key; ARGV[1] lease ms, ARGV[2] owner.
/// nil when acquired, otherwise the remaining ttl of the current holder.
const ACQUIRE_LUA: &str = r#"
if (redis.call('exists', KEYS[1]) == 0) or (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then
    redis.call('hincrby', KEYS[1], ARGV[2], 1);
    redis.call('pexpire', KEYS[1], ARGV[1]);
    return nil;
end;
return redis.call('pttl', KEYS[1]);
"#;

/// KEYS[1] lock key, KEYS[2] channel; ARGV[1] message, ARGV[2] lease ms, ARGV[3] owner.
/// nil when the owner holds nothing, 0 when still held, 1 when deleted.
const RELEASE_LUA: &str = r#"
if (redis.call('hexists', KEYS[1], ARGV[3]) == 0) then
    return nil;
end;
local counter = redis.call('hincrby', KEYS[1], ARGV[3], -1);
if (counter > 0) then
    redis.call('pexpire', KEYS[1], ARGV[2]);
    return 0;
end;
redis.call('del', KEYS[1]);
redis.call('publish', KEYS[2], ARGV[1]);
return 1;
"#;

/// KEYS[1] lock key; ARGV[1] lease ms, ARGV[2] owner.
const RENEW_LUA: &str = r#"
if (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then
    redis.call('pexpire', KEYS[1], ARGV[1]);
    return 1;
end;
return 0;
"#;

/// KEYS[1] lock key, KEYS[2] channel; ARGV[1] message.
const FORCE_UNLOCK_LUA: &str = r#"
if (redis.call('del', KEYS[1]) == 1) then
    redis.call('publish', KEYS[2], ARGV[1]);
    return 1;
end;
return 0;
"#;

static ACQUIRE_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(ACQUIRE_LUA));
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RELEASE_LUA));
static RENEW_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RENEW_LUA));
static FORCE_UNLOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(FORCE_UNLOCK_LUA));

/// Redis-backed store. Commands share one multiplexed, auto-reconnecting
/// connection; each subscription opens its own pub/sub connection.
pub struct RedisLockStore {
    client: redis::Client,
    connection: ConnectionManager,
}

impl RedisLockStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(store_error)?;
        debug!(url = %url, "Connected to redis lock store");
        Ok(Self { client, connection })
    }
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Script(e.to_string())
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn execute(&self, command: LockCommand) -> StoreResult<LockCommandResponse> {
        let mut conn = self.connection.clone();
        let name = command.name();

        let response = match command {
            LockCommand::TryAcquire {
                key,
                owner,
                lease_ms,
            } => {
                let ttl: Option<i64> = ACQUIRE_SCRIPT
                    .key(&key)
                    .arg(lease_ms)
                    .arg(&owner)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(store_error)?;
                LockCommandResponse::Acquire(match ttl {
                    None => AcquireReply::Acquired,
                    Some(ms) => AcquireReply::Contended {
                        ttl_ms: (ms >= 0).then_some(ms as u64),
                    },
                })
            }
            LockCommand::Release {
                key,
                channel,
                owner,
                lease_ms,
            } => {
                let reply: Option<i64> = RELEASE_SCRIPT
                    .key(&key)
                    .key(&channel)
                    .arg(UNLOCK_MESSAGE)
                    .arg(lease_ms)
                    .arg(&owner)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(store_error)?;
                LockCommandResponse::Release(match reply {
                    None => ReleaseReply::Noop,
                    Some(0) => ReleaseReply::Partial,
                    Some(1) => ReleaseReply::Full,
                    Some(other) => {
                        return Err(StoreError::UnexpectedReply {
                            command: name,
                            reply: other.to_string(),
                        });
                    }
                })
            }
            LockCommand::Renew {
                key,
                owner,
                lease_ms,
            } => {
                let renewed: i64 = RENEW_SCRIPT
                    .key(&key)
                    .arg(lease_ms)
                    .arg(&owner)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(store_error)?;
                LockCommandResponse::Renew {
                    renewed: renewed == 1,
                }
            }
            LockCommand::ForceUnlock { key, channel } => {
                let existed: i64 = FORCE_UNLOCK_SCRIPT
                    .key(&key)
                    .key(&channel)
                    .arg(UNLOCK_MESSAGE)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(store_error)?;
                LockCommandResponse::ForceUnlock {
                    existed: existed == 1,
                }
            }
            LockCommand::Inspect { key } => {
                let (fields, pttl): (HashMap<String, i64>, i64) = redis::pipe()
                    .atomic()
                    .hgetall(&key)
                    .pttl(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(store_error)?;
                LockCommandResponse::Inspect(LockEntry::decode(&key, fields, pttl)?)
            }
        };

        Ok(response)
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        let mut conn = self.connection.clone();
        let receivers: usize = conn.publish(channel, message).await.map_err(store_error)?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(store_error)?;
        pubsub.subscribe(channel).await.map_err(store_error)?;

        let messages = pubsub
            .into_on_message()
            .map(|msg| {
                msg.get_payload::<String>()
                    .unwrap_or_else(|_| UNLOCK_MESSAGE.to_string())
            })
            .boxed();

        Ok(Subscription::new(channel, messages))
    }
}
