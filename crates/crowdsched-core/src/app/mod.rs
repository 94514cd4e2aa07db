//! App - アプリケーション層
//!
//! このモジュールは、ports と sched を組み合わせて外部に公開する操作を実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **NewTaskService**: new-task 取得・提出コールバック・提示時刻・進捗

pub mod builder;
pub mod new_task;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::new_task::{
    ANONYMOUS_NOT_ALLOWED, MAX_LIMIT, NewTaskRequest, NewTaskResponse, NewTaskService, ProjectRef,
    Requester, UserProgress,
};
