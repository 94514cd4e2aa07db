//! Domain identifiers (strongly-typed IDs).
//!
//! リレーショナルストアの主キーは整数なので、`i64` をラップしたジェネリック ID を使います。
//! Phantom type パターンで `ProjectId` と `TaskId` を混同できないようにしています。
//!
//! JSON 上は素の整数としてシリアライズされます（`#[serde(transparent)]`）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"project-", "task-", "user-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは `i64` と同じです。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: i64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    /// 内部の整数値を取得（ストアのキーやバインドパラメータ用）
    pub fn get(&self) -> i64 {
        self.value
    }
}

impl<T: IdMarker> From<i64> for Id<T> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Project {}

impl IdMarker for Project {
    fn prefix() -> &'static str {
        "project-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

// ========================================
// Type Alias
// ========================================

/// Project の ID（タスクとスケジューラ設定の持ち主）
pub type ProjectId = Id<Project>;

/// Task の ID（貢献者に渡す作業単位）
pub type TaskId = Id<Task>;

/// 登録ユーザーの ID
pub type UserId = Id<User>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(ProjectId::new(3).to_string(), "project-3");
        assert_eq!(TaskId::new(42).to_string(), "task-42");
        assert_eq!(UserId::new(7).to_string(), "user-7");
        // let _: ProjectId = TaskId::new(1); // <- does not compile
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let task_id = TaskId::new(42);
        assert_eq!(serde_json::to_string(&task_id).unwrap(), "42");

        let back: TaskId = serde_json::from_str("42").unwrap();
        assert_eq!(back, task_id);
    }

    #[test]
    fn ids_order_by_value() {
        let mut ids = vec![TaskId::new(3), TaskId::new(1), TaskId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![TaskId::new(1), TaskId::new(2), TaskId::new(3)]);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<i64>());
    }
}
