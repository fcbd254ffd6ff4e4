//! Redis fast tier.
//!
//! Each key is a hash `{v: <json>, rev: <version>}`. Versions come from one global
//! counter key so a deleted-then-recreated key never reuses a version. Versioned
//! writes run as a Lua script so the precondition check and the write are atomic.

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use switchyard_core::state::{Expiry, FastStore, Precondition, StoreError, StoreResult, Versioned};
use tracing::{debug, info};

const BACKEND: &str = "redis";

/// KEYS[1] = entry, KEYS[2] = version counter.
/// ARGV = value, precondition mode, expected version, expiry mode, ttl ms.
/// Returns the new version, or -1 if the precondition failed.
static SET_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local current = redis.call('HGET', KEYS[1], 'rev')
if ARGV[2] == 'absent' and current then
  return -1
end
if ARGV[2] == 'version' and current ~= ARGV[3] then
  return -1
end
local rev = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'rev', rev)
if ARGV[4] == 'after' then
  redis.call('PEXPIRE', KEYS[1], ARGV[5])
elseif ARGV[4] == 'never' then
  redis.call('PERSIST', KEYS[1])
end
return rev
"#,
    )
});

pub struct RedisFastStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisFastStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the connection cannot be established.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        info!(url = %url, "Connecting to Redis");

        let client = Client::open(url).map_err(classify)?;
        let conn = ConnectionManager::new(client).await.map_err(classify)?;

        info!("Connected to Redis");
        Ok(Self {
            conn,
            prefix: "switchyard:".to_string(),
        })
    }

    /// Namespaces every key under `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn counter_key(&self) -> String {
        format!("{}__rev", self.prefix)
    }
}

fn classify(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout {
            backend: BACKEND,
            elapsed: Duration::ZERO,
        }
    } else if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_cluster_error()
    {
        StoreError::unavailable(BACKEND, err.to_string())
    } else {
        StoreError::backend(BACKEND, err.to_string())
    }
}

fn precondition_args(precondition: Precondition) -> (&'static str, String) {
    match precondition {
        Precondition::None => ("none", String::new()),
        Precondition::Absent => ("absent", String::new()),
        Precondition::Version(v) => ("version", v.to_string()),
    }
}

fn expiry_args(expiry: Expiry) -> (&'static str, u64) {
    match expiry {
        Expiry::Never => ("never", 0),
        Expiry::After(ttl) => ("after", (ttl.as_millis() as u64).max(1)),
        Expiry::Keep => ("keep", 0),
    }
}

#[async_trait]
impl FastStore for RedisFastStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        expiry: Expiry,
        precondition: Precondition,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(&value)?;
        let (mode, expected) = precondition_args(precondition);
        let (expiry_mode, ttl_ms) = expiry_args(expiry);

        debug!(key = %key, ?precondition, ?expiry, "Setting key");

        let result: i64 = SET_SCRIPT
            .key(self.entry_key(key))
            .key(self.counter_key())
            .arg(serialized)
            .arg(mode)
            .arg(expected)
            .arg(expiry_mode)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        if result < 0 {
            return Err(StoreError::conflict(key, format!("precondition {:?} failed", precondition)));
        }
        Ok(result as u64)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Versioned<Value>>> {
        let mut conn = self.conn.clone();
        let (value, version): (Option<String>, Option<u64>) = redis::cmd("HMGET")
            .arg(self.entry_key(key))
            .arg("v")
            .arg("rev")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        match (value, version) {
            (Some(value), Some(version)) => Ok(Some(Versioned {
                value: serde_json::from_str(&value)?,
                version,
            })),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.entry_key(key)).await.map_err(classify)?;
        Ok(removed > 0)
    }

    async fn renew_ttl(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let ms = (ttl.as_millis() as i64).max(1);
        conn.pexpire(self.entry_key(key), ms).await.map_err(classify)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
