//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。各 trait は共有ストアへの
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - PostgreSQL が task / task_run / counter / project の正本（読み取り専用）
//! - Redis はロック（quota 付きリース）と提示時刻スタンプの置き場
//! - リクエスト間の調整はすべてこの 2 つのストア経由で行う

pub mod clock;
pub mod contributions_guard;
pub mod lock_manager;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::contributions_guard::ContributionsGuard;
pub use self::lock_manager::{LockKey, LockManager};
pub use self::task_store::{CandidateQuery, ProjectRepository, TaskRepository};
