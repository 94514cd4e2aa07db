//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - グローバル状態を持たず、クライアントハンドルを注入する

use std::sync::Arc;

use tracing::info;

use crate::app::new_task::NewTaskService;
use crate::ports::{ContributionsGuard, LockManager, ProjectRepository, TaskRepository};
use crate::sched::{Scheduler, SchedulerSettings};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .store(store)
///     .locks(locks)
///     .guard(guard)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に必須ポートがすべて設定されているかチェック
/// - 不足があれば BuildError を返す
#[derive(Default)]
pub struct AppBuilder {
    projects: Option<Arc<dyn ProjectRepository>>,
    tasks: Option<Arc<dyn TaskRepository>>,
    locks: Option<Arc<dyn LockManager>>,
    guard: Option<Arc<dyn ContributionsGuard>>,
    settings: SchedulerSettings,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing ports: {0:?}. These must be injected before build().")]
    MissingPorts(Vec<&'static str>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1 つのリレーショナルストアで両方のリポジトリを賄う場合
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: ProjectRepository + TaskRepository + 'static,
    {
        let projects: Arc<dyn ProjectRepository> = store.clone();
        let tasks: Arc<dyn TaskRepository> = store;
        self.projects(projects).tasks(tasks)
    }

    pub fn projects(mut self, projects: Arc<dyn ProjectRepository>) -> Self {
        self.projects = Some(projects);
        self
    }

    pub fn tasks(mut self, tasks: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn guard(mut self, guard: Arc<dyn ContributionsGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - projects / tasks / locks / guard が全て設定されているかチェック
    /// - 不足があれば BuildError::MissingPorts を返す
    pub fn build(self) -> Result<App, BuildError> {
        let settings = self.settings;
        let mut missing = Vec::new();
        if self.projects.is_none() {
            missing.push("projects");
        }
        if self.tasks.is_none() {
            missing.push("tasks");
        }
        if self.locks.is_none() {
            missing.push("locks");
        }
        if self.guard.is_none() {
            missing.push("guard");
        }

        let (Some(projects), Some(tasks), Some(locks), Some(guard)) =
            (self.projects, self.tasks, self.locks, self.guard)
        else {
            return Err(BuildError::MissingPorts(missing));
        };

        let scheduler = Scheduler::new(projects.clone(), tasks.clone(), locks, settings);
        let service = NewTaskService::new(scheduler.clone(), projects, tasks, guard);
        info!(?settings, "app wired");
        Ok(App { scheduler, service })
    }
}

/// App はワイヤリング済みのアプリケーション
#[derive(Clone)]
pub struct App {
    pub scheduler: Scheduler,
    pub service: NewTaskService,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryContributionsGuard, InMemoryLockManager, InMemoryTaskStore};
    use crate::ports::SystemClock;
    use chrono::Duration;

    fn locks() -> Arc<InMemoryLockManager> {
        Arc::new(InMemoryLockManager::new(
            Arc::new(SystemClock),
            Duration::seconds(60),
        ))
    }

    fn guard() -> Arc<InMemoryContributionsGuard> {
        Arc::new(InMemoryContributionsGuard::new(
            Arc::new(SystemClock),
            Duration::seconds(60),
        ))
    }

    #[test]
    fn test_build_success() {
        let app = AppBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .locks(locks())
            .guard(guard())
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_ports() {
        let app = AppBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingPorts(missing)) if missing == vec!["locks", "guard"]
        ));
    }

    #[test]
    fn test_build_nothing_injected() {
        let app = AppBuilder::new().build();
        assert!(matches!(
            app,
            Err(BuildError::MissingPorts(missing)) if missing.len() == 4
        ));
    }

    #[test]
    fn test_settings_reach_scheduler() {
        let settings = SchedulerSettings {
            locked_batch: 3,
            incremental_pool: 7,
        };
        let app = AppBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .locks(locks())
            .guard(guard())
            .settings(settings)
            .build()
            .unwrap();
        assert_eq!(app.scheduler.settings(), settings);
    }
}
