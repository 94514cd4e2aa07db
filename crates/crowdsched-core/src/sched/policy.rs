//! SchedulerPolicy - プロジェクトごとに設定するスケジューリング方式
//!
//! 方式の集合は固定なので、名前 → 関数の登録表ではなく閉じた enum と
//! 1 つの match でディスパッチします。

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPolicy {
    /// アドミッション制御: リース quota が残っている間だけ渡す
    #[default]
    #[serde(rename = "locked_scheduler")]
    Locked,
    BreadthFirst,
    DepthFirst,
    Incremental,
}

impl SchedulerPolicy {
    /// 設定名を解決
    ///
    /// 未設定・`default`・未知の名前は [`SchedulerPolicy::Locked`]
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("breadth_first") => Self::BreadthFirst,
            Some("depth_first") => Self::DepthFirst,
            Some("incremental") => Self::Incremental,
            _ => Self::Locked,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked_scheduler",
            Self::BreadthFirst => "breadth_first",
            Self::DepthFirst => "depth_first",
            Self::Incremental => "incremental",
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 設定 UI 向けの (名前, ラベル) の組
pub fn sched_variants() -> Vec<(&'static str, &'static str)> {
    vec![
        ("default", "Default"),
        ("breadth_first", "Breadth First"),
        ("depth_first", "Depth First"),
        ("locked_scheduler", "Locked"),
    ]
}
