//! Redis adapters (requires the `redis` Cargo feature).
//!
//! ロックは `HSET key holder expires_at_ms` のハッシュで表現します。
//! acquire は Lua スクリプト 1 本で「期限切れ削除 → HLEN → HSET」を行うため、
//! 複数プロセスからの同時 acquire でも quota を超えません。
//! 現在時刻は注入された Clock から渡します。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::debug;

use crate::domain::{GuardError, Identity, LockError, TaskId};
use crate::ports::contributions_guard::{presented_key, stamp_key};
use crate::ports::{Clock, ContributionsGuard, LockKey, LockManager};

const ACQUIRE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local holder = ARGV[3]
local quota = tonumber(ARGV[4])
local entries = redis.call('HGETALL', KEYS[1])
for i = 1, #entries, 2 do
  if tonumber(entries[i + 1]) <= now then
    redis.call('HDEL', KEYS[1], entries[i])
  end
end
if redis.call('HEXISTS', KEYS[1], holder) == 1 or redis.call('HLEN', KEYS[1]) < quota then
  redis.call('HSET', KEYS[1], holder, now + ttl)
  redis.call('PEXPIRE', KEYS[1], ttl)
  return 1
end
return 0
"#;

fn is_unreachable(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
}

fn lock_err(e: RedisError) -> LockError {
    if is_unreachable(&e) {
        LockError::Unavailable(e.to_string())
    } else {
        LockError::Protocol(e.to_string())
    }
}

fn guard_err(e: RedisError) -> GuardError {
    GuardError::Unavailable(e.to_string())
}

/// 自動再接続つきの接続を開く
pub async fn connect(url: &str) -> Result<ConnectionManager, RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}

/// RedisLockManager は Redis ハッシュによる LockManager
///
/// quota が 0 以下なら新しい保持者は常に拒否（既存の保持者は延長のみ）
pub struct RedisLockManager {
    conn: ConnectionManager,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    acquire: Script,
}

impl RedisLockManager {
    pub fn new(conn: ConnectionManager, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            conn,
            clock,
            ttl,
            acquire: Script::new(ACQUIRE_SCRIPT),
        }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, key: &LockKey, holder: &str, quota: i64) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let now_ms = self.clock.now().timestamp_millis();
        let granted: i64 = self
            .acquire
            .key(key.as_str())
            .arg(now_ms)
            .arg(self.ttl.num_milliseconds())
            .arg(holder)
            .arg(quota)
            .invoke_async(&mut conn)
            .await
            .map_err(lock_err)?;
        debug!(key = %key, holder, quota, granted, "acquire script");
        Ok(granted == 1)
    }

    async fn has(&self, key: &LockKey, holder: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let expires_at: Option<i64> = redis::cmd("HGET")
            .arg(key.as_str())
            .arg(holder)
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;
        let now_ms = self.clock.now().timestamp_millis();
        Ok(expires_at.is_some_and(|ms| ms > now_ms))
    }

    async fn release(&self, key: &LockKey, holder: &str) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HDEL")
            .arg(key.as_str())
            .arg(holder)
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;
        Ok(())
    }
}

/// RedisContributionsGuard は `SET EX` によるスタンプストア
///
/// 有効期限は Redis 側の時計で管理される
pub struct RedisContributionsGuard {
    conn: ConnectionManager,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RedisContributionsGuard {
    pub fn new(conn: ConnectionManager, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { conn, clock, ttl }
    }

    async fn set(&self, key: String) -> Result<(), GuardError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(self.clock.now().to_rfc3339())
            .arg("EX")
            .arg(self.ttl.num_seconds())
            .query_async(&mut conn)
            .await
            .map_err(guard_err)?;
        Ok(())
    }

    async fn get(&self, key: String) -> Result<Option<String>, GuardError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(guard_err)
    }
}

#[async_trait]
impl ContributionsGuard for RedisContributionsGuard {
    async fn stamp(&self, task_id: TaskId, identity: &Identity) -> Result<(), GuardError> {
        self.set(stamp_key(task_id, identity)).await
    }

    async fn check_stamp(&self, task_id: TaskId, identity: &Identity) -> Result<bool, GuardError> {
        Ok(self.get(stamp_key(task_id, identity)).await?.is_some())
    }

    async fn stamp_presented_time(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<(), GuardError> {
        self.set(presented_key(task_id, identity)).await
    }

    async fn check_presented_timestamp(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<bool, GuardError> {
        Ok(self.get(presented_key(task_id, identity)).await?.is_some())
    }

    async fn presented_time(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, GuardError> {
        let raw = self.get(presented_key(task_id, identity)).await?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}
