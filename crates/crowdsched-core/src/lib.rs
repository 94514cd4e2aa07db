//! crowdsched-core
//!
//! Task scheduling and distributed locking for a crowdsourcing platform.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, identity, task, project, order, errors）
//! - **ports**: 抽象化レイヤー（LockManager, TaskRepository, ProjectRepository, ContributionsGuard, Clock）
//! - **impls**: 実装（in-memory / Redis / PostgreSQL）
//! - **sched**: スケジューリングポリシーと Scheduler
//! - **app**: アプリケーション層（AppBuilder, NewTaskService）
//! - **config**: 環境変数からの設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod sched;
