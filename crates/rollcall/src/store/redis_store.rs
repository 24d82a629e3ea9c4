//! Redis-backed identity store.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use rollcall_common::constants::redis_keys;
use rollcall_common::{ControlPlaneState, RollcallError, RollcallResult};

use super::{IdentityStore, decode, encode_next};

/// Replace the blob only if its embedded version matches ARGV[1].
/// Returns 1 on success, -1 on version mismatch.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local version = 0
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and decoded['version'] then
    version = tonumber(decoded['version'])
  end
end
if version ~= tonumber(ARGV[1]) then
  return -1
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Identity store keeping one JSON blob per cluster under `rollcall:cluster:{name}`
#[derive(Clone)]
pub struct RedisIdentityStore {
    /// Redis connection manager (auto-reconnecting)
    redis: ConnectionManager,
    cas: redis::Script,
}

impl RedisIdentityStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            cas: redis::Script::new(CAS_SCRIPT),
        }
    }
}

fn connection_error(err: redis::RedisError) -> RollcallError {
    RollcallError::Connection(format!("redis: {err}"))
}

#[async_trait]
impl IdentityStore for RedisIdentityStore {
    async fn load(&self, name: &str) -> RollcallResult<Option<ControlPlaneState>> {
        let mut conn = self.redis.clone();
        let blob: Option<String> = conn
            .get(redis_keys::cluster(name))
            .await
            .map_err(connection_error)?;

        blob.map(|b| decode(name, &b)).transpose()
    }

    async fn save(&self, state: &ControlPlaneState) -> RollcallResult<u64> {
        let (next, blob) = encode_next(state)?;
        let mut conn = self.redis.clone();

        let outcome: i64 = self
            .cas
            .key(redis_keys::cluster(&state.name))
            .arg(state.version)
            .arg(blob)
            .invoke_async(&mut conn)
            .await
            .map_err(connection_error)?;

        if outcome < 0 {
            return Err(RollcallError::Conflict(format!(
                "control-plane state for {} changed since version {}",
                state.name, state.version
            )));
        }

        tracing::trace!(cluster = %state.name, version = next, "Control-plane state saved");
        Ok(next)
    }

    async fn delete(&self, name: &str) -> RollcallResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn
            .del(redis_keys::cluster(name))
            .await
            .map_err(connection_error)?;
        Ok(removed > 0)
    }
}
