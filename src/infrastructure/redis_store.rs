//! Redis-backed bucket store.
//!
//! Shares buckets between every application instance, so the effective
//! limit is the policy's capacity rather than capacity times instance count.
//!
//! ## Architecture
//!
//! Each consumption runs one Lua script, which makes the check-and-record
//! atomic on the server:
//! - `{prefix}{policy:identity}:log` - sorted set of spent points, scored by
//!   server time in milliseconds (the sliding window)
//! - `{prefix}{policy:identity}:cooldown` - marker whose `PX` expiry is the
//!   remaining cooldown
//! - `{prefix}{policy:identity}:seq` - counter making log members unique
//!
//! The braces are a cluster hash tag, keeping one bucket's keys on one slot.
//! Time comes from the Redis `TIME` command, so instance clocks do not need
//! to agree. Requires Redis 5 or later.
//!
//! Every key carries an expiry, so idle buckets disappear on their own and
//! `prune_expired` has nothing to do.
//!
//! ## Runtime
//!
//! Async callers should use `RateLimitGate::check_rate_limit_async`, which
//! awaits the script on any runtime flavor. The synchronous `BucketStore`
//! port blocks: called from inside a tokio runtime it uses
//! `block_in_place`, which needs the multi-threaded runtime, and fails with
//! `StoreError::Runtime` on a current-thread runtime.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brokerz_throttle::{PolicyName, PolicyTable, RateLimitGate, RedisBucketStore, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let store = RedisBucketStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let gate = RateLimitGate::with_store(store, PolicyTable::default(), Arc::new(SystemClock::new()));
//!     let result = gate
//!         .check_rate_limit_async(PolicyName::Login, "user@example.com", "login")
//!         .await;
//! }
//! ```

use crate::application::ports::{AsyncBucketStore, BucketKey, BucketStore, StoreError};
use crate::domain::bucket::Consumption;
use crate::domain::policy::{Policy, PolicyName};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};

const CONSUME_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local capacity = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local cooldown = tonumber(ARGV[3])

local blocked = redis.call('PTTL', KEYS[2])
if blocked > 0 then
  return {0, blocked}
end

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local spent = redis.call('ZCARD', KEYS[1])
if spent < capacity then
  local seq = redis.call('INCR', KEYS[3])
  redis.call('ZADD', KEYS[1], now, now .. ':' .. seq)
  redis.call('PEXPIRE', KEYS[1], window)
  redis.call('PEXPIRE', KEYS[3], window)
  return {1, capacity - spent - 1}
end

if cooldown > 0 then
  redis.call('SET', KEYS[2], '1', 'PX', cooldown)
  redis.call('DEL', KEYS[1], KEYS[3])
  return {0, cooldown}
end

local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local wait = tonumber(oldest[2]) + window - now
if wait < 1 then
  wait = 1
end
return {0, wait}
"#;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix for every key (default: "brokerz-throttle:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "brokerz-throttle:".to_string(),
        }
    }
}

/// Bucket store shared through Redis.
#[derive(Clone)]
pub struct RedisBucketStore {
    connection: ConnectionManager,
    script: Arc<Script>,
    runtime: Handle,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBucketStore {
    /// Connect with the default configuration.
    ///
    /// Must be called from within a tokio runtime; the store keeps a handle
    /// to it for later calls.
    ///
    /// # Errors
    /// Returns `StoreError::Redis` if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with a custom configuration.
    ///
    /// # Errors
    /// Returns `StoreError::Redis` if the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            script: Arc::new(Script::new(CONSUME_SCRIPT)),
            runtime: Handle::current(),
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn bucket_keys(&self, key: &BucketKey) -> [String; 3] {
        let base = format!("{}{{{}}}", self.config.key_prefix, key);
        [
            format!("{}:log", base),
            format!("{}:cooldown", base),
            format!("{}:seq", base),
        ]
    }

    /// Spend one point (async).
    ///
    /// # Errors
    /// Returns `StoreError` on Redis failure or an unexpected script reply.
    pub async fn consume_async(
        &self,
        key: &BucketKey,
        policy: &Policy,
    ) -> Result<Consumption, StoreError> {
        let [log, cooldown, seq] = self.bucket_keys(key);
        let mut conn = self.connection.clone();

        let reply: Vec<i64> = self
            .script
            .key(log)
            .key(cooldown)
            .key(seq)
            .arg(policy.capacity())
            .arg(policy.window().as_millis() as u64)
            .arg(policy.cooldown().as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [1, remaining] => Ok(Consumption::Allowed {
                remaining: u32::try_from(*remaining).unwrap_or(0),
            }),
            [0, wait_ms] => Ok(Consumption::Rejected {
                retry_after: Duration::from_millis(u64::try_from(*wait_ms).unwrap_or(0)),
            }),
            other => Err(StoreError::Backend(format!(
                "unexpected consume reply: {:?}",
                other
            ))),
        }
    }

    /// Forget one bucket (async).
    ///
    /// # Errors
    /// Returns `StoreError::Redis` on failure.
    pub async fn remove_async(&self, key: &BucketKey) -> Result<(), StoreError> {
        let keys = self.bucket_keys(key);
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(&keys[..]).await?;
        Ok(())
    }

    /// Forget every bucket under the key prefix (async).
    ///
    /// # Errors
    /// Returns `StoreError::Redis` on failure.
    pub async fn clear_async(&self) -> Result<(), StoreError> {
        let pattern = format!("{}*", self.config.key_prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                conn.del::<_, ()>(&keys).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(())
    }

    /// Drive a future to completion from synchronous code.
    fn block_on<F, T>(&self, future: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match Handle::try_current() {
            Ok(current) => {
                if current.runtime_flavor() == RuntimeFlavor::CurrentThread {
                    return Err(StoreError::Runtime(
                        "redis store cannot block inside a current-thread runtime; \
                         use check_rate_limit_async"
                            .to_string(),
                    ));
                }
                tokio::task::block_in_place(|| self.runtime.block_on(future))
            }
            Err(_) => self.runtime.block_on(future),
        }
    }
}

impl BucketStore for RedisBucketStore {
    fn try_consume(
        &self,
        key: &BucketKey,
        policy: &Policy,
        _now: Instant,
    ) -> Result<Consumption, StoreError> {
        self.block_on(self.consume_async(key, policy))
    }

    fn remove(&self, key: &BucketKey) -> Result<(), StoreError> {
        self.block_on(self.remove_async(key))
    }

    fn prune_expired(
        &self,
        _now: Instant,
        _policy_for: &dyn Fn(PolicyName) -> Policy,
    ) -> Result<usize, StoreError> {
        // Key expiry already removes idle buckets
        Ok(0)
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.block_on(self.clear_async())
    }
}

#[async_trait::async_trait]
impl AsyncBucketStore for RedisBucketStore {
    async fn try_consume_async(
        &self,
        key: &BucketKey,
        policy: &Policy,
        _now: Instant,
    ) -> Result<Consumption, StoreError> {
        self.consume_async(key, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_prefix() {
        assert_eq!(RedisStoreConfig::default().key_prefix, "brokerz-throttle:");
    }

    #[test]
    fn test_script_reply_contract() {
        // try_consume decodes exactly these two reply shapes
        assert!(CONSUME_SCRIPT.contains("return {1, capacity - spent - 1}"));
        assert!(CONSUME_SCRIPT.contains("return {0, cooldown}"));
    }
}
