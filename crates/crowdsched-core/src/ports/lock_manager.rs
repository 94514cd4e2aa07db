//! LockManager port - 高速 KV ストア上のリース
//!
//! リソースキーごとに「保持者 → 有効期限」を持ち、quota と TTL で同時保持数を制限します。
//!
//! # 設計原則
//! - acquire の「期限切れ掃除 → 数える → セット」はストア側で原子的に行う
//! - ストアに到達できない場合は `LockError` を返す（「ロックなし」扱いにしない）
//! - 同じ保持者の再 acquire は TTL の更新のみで、quota を二重に消費しない

use async_trait::async_trait;
use std::fmt;

use crate::domain::{LockError, ProjectId, TaskId};

/// 高速ストア上のタスク単位リースのキー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub const PREFIX: &'static str = "crowdsched:lock";

    pub fn for_task(project_id: ProjectId, task_id: TaskId) -> Self {
        Self(format!(
            "{}:project:{}:task:{}",
            Self::PREFIX,
            project_id.get(),
            task_id.get()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// `holder` にリースを与える
    ///
    /// 既に保持しているか、有効な保持者が `quota` 未満なら付与して true
    async fn acquire(&self, key: &LockKey, holder: &str, quota: i64) -> Result<bool, LockError>;

    /// `holder` が `key` の有効なリースを持つか
    async fn has(&self, key: &LockKey, holder: &str) -> Result<bool, LockError>;

    /// `holder` のリースを解放（無ければ何もしない）
    async fn release(&self, key: &LockKey, holder: &str) -> Result<(), LockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_embeds_project_and_task() {
        let key = LockKey::for_task(ProjectId::new(4), TaskId::new(17));
        assert_eq!(key.as_str(), "crowdsched:lock:project:4:task:17");
    }
}
