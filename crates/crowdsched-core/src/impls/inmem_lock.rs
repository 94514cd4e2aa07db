//! InMemoryLockManager - 開発・テスト用のロックストア
//!
//! Redis のハッシュ（保持者 → 有効期限）を HashMap で再現します。
//! 「期限切れ掃除 → 数える → セット」は 1 回の Mutex 区間で行うので、
//! Redis 実装の Lua スクリプトと同じく原子的です。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::LockError;
use crate::ports::{Clock, LockKey, LockManager};

type Holders = HashMap<String, DateTime<Utc>>;

/// 期限切れの保持者を掃除し、空になったキーを取り除く
fn purge_expired(leases: &mut HashMap<LockKey, Holders>, now: DateTime<Utc>) {
    leases.retain(|_, holders| {
        holders.retain(|_, expires| *expires > now);
        !holders.is_empty()
    });
}

/// InMemoryLockManager は開発・テスト用の LockManager
///
/// # 実装詳細
/// - HashMap<LockKey, 保持者 → 有効期限> を tokio Mutex で保護
/// - acquire ごとに期限切れエントリと空のキーを掃除
/// - `set_available(false)` で到達不能なストアを再現
pub struct InMemoryLockManager {
    leases: Arc<Mutex<HashMap<LockKey, Holders>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    /// false の間はすべての呼び出しが到達不能エラーになる
    available: AtomicBool,
}

impl InMemoryLockManager {
    /// 新しい InMemoryLockManager を作成
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            clock,
            ttl,
            available: AtomicBool::new(true),
        }
    }

    /// 障害シミュレーションの切り替え
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), LockError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::Unavailable("in-memory lock store is offline".into()))
        }
    }

    /// `key` の有効な保持者（テスト・デモ用）
    pub async fn holders(&self, key: &LockKey) -> Vec<String> {
        let now = self.clock.now();
        let leases = self.leases.lock().await;
        let mut holders: Vec<String> = leases
            .get(key)
            .map(|h| {
                h.iter()
                    .filter(|(_, expires)| **expires > now)
                    .map(|(holder, _)| holder.clone())
                    .collect()
            })
            .unwrap_or_default();
        holders.sort();
        holders
    }

    /// 保持しているキーの数（期限切れを含む生の件数、テスト用）
    pub async fn tracked_keys(&self) -> usize {
        self.leases.lock().await.len()
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    /// リースを取得
    ///
    /// # 実装
    /// 1. Mutex をロック
    /// 2. 期限切れの保持者と空のキーを掃除
    /// 3. 既に保持していれば期限を延長、そうでなければ quota 未満のときだけ追加
    async fn acquire(&self, key: &LockKey, holder: &str, quota: i64) -> Result<bool, LockError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        purge_expired(&mut leases, now);

        let (already_held, count) = leases
            .get(key)
            .map(|h| (h.contains_key(holder), h.len() as i64))
            .unwrap_or((false, 0));
        if !already_held && count >= quota {
            return Ok(false);
        }
        leases
            .entry(key.clone())
            .or_default()
            .insert(holder.to_string(), now + self.ttl);
        Ok(true)
    }

    async fn has(&self, key: &LockKey, holder: &str) -> Result<bool, LockError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        let Some(holders) = leases.get_mut(key) else {
            return Ok(false);
        };
        holders.retain(|_, expires| *expires > now);
        let held = holders.contains_key(holder);
        if holders.is_empty() {
            leases.remove(key);
        }
        Ok(held)
    }

    async fn release(&self, key: &LockKey, holder: &str) -> Result<(), LockError> {
        self.ensure_available()?;
        let mut leases = self.leases.lock().await;
        if let Some(holders) = leases.get_mut(key) {
            holders.remove(holder);
            if holders.is_empty() {
                leases.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProjectId, TaskId};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn setup() -> (InMemoryLockManager, FixedClock, LockKey) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let locks = InMemoryLockManager::new(Arc::new(clock.clone()), Duration::seconds(60));
        (locks, clock, LockKey::for_task(ProjectId::new(1), TaskId::new(1)))
    }

    #[tokio::test]
    async fn quota_limits_distinct_holders() {
        let (locks, _, key) = setup();
        assert!(locks.acquire(&key, "user:1", 2).await.unwrap());
        assert!(locks.acquire(&key, "user:2", 2).await.unwrap());
        assert!(!locks.acquire(&key, "user:3", 2).await.unwrap());
        assert_eq!(locks.holders(&key).await, vec!["user:1", "user:2"]);
    }

    #[tokio::test]
    async fn reacquire_does_not_consume_a_second_slot() {
        let (locks, _, key) = setup();
        assert!(locks.acquire(&key, "user:1", 2).await.unwrap());
        assert!(locks.acquire(&key, "user:1", 2).await.unwrap());
        assert!(locks.acquire(&key, "user:2", 2).await.unwrap());
        assert_eq!(locks.holders(&key).await.len(), 2);
    }

    #[tokio::test]
    async fn holder_keeps_lease_even_when_quota_drops() {
        let (locks, _, key) = setup();
        assert!(locks.acquire(&key, "user:1", 1).await.unwrap());
        assert!(locks.acquire(&key, "user:1", 0).await.unwrap());
        assert!(!locks.acquire(&key, "user:2", 0).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_capacity() {
        let (locks, _, key) = setup();
        assert!(locks.acquire(&key, "user:a", 1).await.unwrap());
        assert!(!locks.acquire(&key, "user:b", 1).await.unwrap());

        locks.release(&key, "user:a").await.unwrap();
        assert!(locks.acquire(&key, "user:b", 1).await.unwrap());
    }

    #[tokio::test]
    async fn release_of_absent_lease_is_noop() {
        let (locks, _, key) = setup();
        locks.release(&key, "user:ghost").await.unwrap();
        assert!(!locks.has(&key, "user:ghost").await.unwrap());
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let (locks, clock, key) = setup();
        assert!(locks.acquire(&key, "user:a", 1).await.unwrap());
        assert!(locks.has(&key, "user:a").await.unwrap());

        clock.advance(Duration::seconds(61));
        assert!(!locks.has(&key, "user:a").await.unwrap());
        assert!(locks.acquire(&key, "user:b", 1).await.unwrap());
    }

    #[tokio::test]
    async fn denial_leaves_no_entry_behind() {
        let (locks, _, key) = setup();
        assert!(!locks.acquire(&key, "user:a", 0).await.unwrap());
        assert!(!locks.acquire(&key, "user:a", -1).await.unwrap());
        assert_eq!(locks.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn expired_keys_are_evicted() {
        let (locks, clock, key) = setup();
        let other = LockKey::for_task(ProjectId::new(1), TaskId::new(2));
        assert!(locks.acquire(&key, "user:a", 1).await.unwrap());
        assert!(locks.acquire(&other, "user:a", 1).await.unwrap());
        assert_eq!(locks.tracked_keys().await, 2);

        clock.advance(Duration::seconds(61));
        assert!(!locks.has(&key, "user:a").await.unwrap());
        assert_eq!(locks.tracked_keys().await, 1);

        // Any acquire sweeps the keys nobody looks at anymore.
        let third = LockKey::for_task(ProjectId::new(1), TaskId::new(3));
        assert!(locks.acquire(&third, "user:b", 1).await.unwrap());
        assert_eq!(locks.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn reacquire_refreshes_ttl() {
        let (locks, clock, key) = setup();
        assert!(locks.acquire(&key, "user:a", 1).await.unwrap());
        clock.advance(Duration::seconds(45));
        assert!(locks.acquire(&key, "user:a", 1).await.unwrap());
        clock.advance(Duration::seconds(45));
        assert!(locks.has(&key, "user:a").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_never_exceed_quota() {
        let (locks, _, key) = setup();
        let locks = Arc::new(locks);
        let quota = 3;

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let key = key.clone();
                tokio::spawn(async move { locks.acquire(&key, &format!("user:{i}"), quota).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, quota);
        assert_eq!(locks.holders(&key).await.len() as i64, quota);
    }

    #[tokio::test]
    async fn outage_is_an_error_not_a_denial() {
        let (locks, _, key) = setup();
        locks.set_available(false);
        let err = locks.acquire(&key, "user:a", 1).await.unwrap_err();
        assert!(matches!(err, LockError::Unavailable(_)));
        assert!(locks.has(&key, "user:a").await.is_err());
    }
}
