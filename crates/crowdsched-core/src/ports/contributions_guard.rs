//! ContributionsGuard port - タスク提示時刻のスタンプ
//!
//! new-task で返したタスクを「誰に・いつ提示したか」として KV ストアに記録します。
//! TTL は LockManager と共有します。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{GuardError, Identity, TaskId};

#[async_trait]
pub trait ContributionsGuard: Send + Sync {
    /// `task_id` を `identity` に渡したことを記録
    async fn stamp(&self, task_id: TaskId, identity: &Identity) -> Result<(), GuardError>;

    /// 有効な受け渡しスタンプがあるか
    async fn check_stamp(&self, task_id: TaskId, identity: &Identity) -> Result<bool, GuardError>;

    /// タスクの提示時刻を記録（既存のスタンプは上書き）
    async fn stamp_presented_time(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<(), GuardError>;

    /// 有効な提示時刻スタンプがあるか
    async fn check_presented_timestamp(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<bool, GuardError>;

    async fn presented_time(
        &self,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, GuardError>;
}

/// 全バックエンド共通のキー
pub(crate) fn stamp_key(task_id: TaskId, identity: &Identity) -> String {
    format!(
        "crowdsched:task_requested:{}:task:{}",
        identity.holder_key(),
        task_id.get()
    )
}

pub(crate) fn presented_key(task_id: TaskId, identity: &Identity) -> String {
    format!(
        "crowdsched:task_presented:{}:task:{}",
        identity.holder_key(),
        task_id.get()
    )
}
