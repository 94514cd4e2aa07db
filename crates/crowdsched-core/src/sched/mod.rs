//! Sched - タスク選択
//!
//! - **policy**: SchedulerPolicy enum と設定 UI 向けの一覧
//! - **selection**: 選択リクエストと結果
//! - **policies**: 4 つの選択ルール
//! - **dispatcher**: Scheduler（ポリシー解決・提出可否・閲覧可否・解放フック）

pub mod dispatcher;
pub mod policies;
pub mod policy;
pub mod selection;

pub use self::dispatcher::Scheduler;
pub use self::policies::{LOCKED_MAX_OFFSET, SchedulerSettings};
pub use self::policy::{SchedulerPolicy, sched_variants};
pub use self::selection::{SelectRequest, Selection};
