//! InMemoryContributionsGuard - 開発・テスト用のスタンプストア

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::{GuardError, Identity, TaskId};
use crate::ports::contributions_guard::{presented_key, stamp_key};
use crate::ports::{Clock, ContributionsGuard};

/// スタンプの値と有効期限
#[derive(Debug, Clone, Copy)]
struct Entry {
    value: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// InMemoryContributionsGuard は開発・テスト用の ContributionsGuard
///
/// 書き込みのたびに期限切れのエントリを掃除する
pub struct InMemoryContributionsGuard {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InMemoryContributionsGuard {
    /// 新しい InMemoryContributionsGuard を作成
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            ttl,
        }
    }

    async fn put(&self, key: String) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key,
            Entry {
                value: now,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn live(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key).copied() {
            Some(e) if e.expires_at > now => Some(e.value),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// 保持しているエントリ数（期限切れを含む生の件数、テスト用）
    pub async fn tracked_entries(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl ContributionsGuard for InMemoryContributionsGuard {
    async fn stamp(&self, task_id: TaskId, identity: &Identity) -> Result<(), GuardError> {
        self.put(stamp_key(task_id, identity)).await;
        Ok(())
    }

    async fn check_stamp(&self, task_id: TaskId, identity: &Identity) -> Result<bool, GuardError> {
        Ok(self.live(&stamp_key(task_id, identity)).await.is_some())
    }

    async fn stamp_presented_time(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<(), GuardError> {
        self.put(presented_key(task_id, identity)).await;
        Ok(())
    }

    async fn check_presented_timestamp(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<bool, GuardError> {
        Ok(self.live(&presented_key(task_id, identity)).await.is_some())
    }

    async fn presented_time(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, GuardError> {
        Ok(self.live(&presented_key(task_id, identity)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    #[tokio::test]
    async fn stamps_expire_after_ttl() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let guard = InMemoryContributionsGuard::new(Arc::new(clock.clone()), Duration::seconds(10));
        let who = Identity::Registered(UserId::new(1));

        guard.stamp(TaskId::new(5), &who).await.unwrap();
        assert!(guard.check_stamp(TaskId::new(5), &who).await.unwrap());
        assert!(!guard.check_presented_timestamp(TaskId::new(5), &who).await.unwrap());

        clock.advance(Duration::seconds(11));
        assert!(!guard.check_stamp(TaskId::new(5), &who).await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let guard = InMemoryContributionsGuard::new(Arc::new(clock.clone()), Duration::seconds(10));
        let who = Identity::Registered(UserId::new(1));

        guard.stamp(TaskId::new(1), &who).await.unwrap();
        guard.stamp(TaskId::new(2), &who).await.unwrap();
        assert_eq!(guard.tracked_entries().await, 2);

        clock.advance(Duration::seconds(11));
        assert!(!guard.check_stamp(TaskId::new(1), &who).await.unwrap());
        assert_eq!(guard.tracked_entries().await, 1);

        guard.stamp(TaskId::new(3), &who).await.unwrap();
        assert_eq!(guard.tracked_entries().await, 1);
    }

    #[tokio::test]
    async fn presented_time_records_clock_value() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        let guard = InMemoryContributionsGuard::new(Arc::new(clock), Duration::seconds(10));
        let who = Identity::Anonymous("1.2.3.4".into());

        guard.stamp_presented_time(TaskId::new(1), &who).await.unwrap();
        assert_eq!(
            guard.presented_time(TaskId::new(1), &who).await.unwrap(),
            Some(start)
        );
    }
}
