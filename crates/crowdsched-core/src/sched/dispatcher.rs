//! Scheduler - ポリシーの解決とディスパッチ
//!
//! # フロー
//! 1. project の `info.sched` から SchedulerPolicy を解決
//! 2. 該当ポリシーで候補を選択（locked なら LockManager でアドミッション）
//! 3. TaskRun 永続化後に `on_submitted` でロックを解放
//!
//! Scheduler 自身は共有可変状態を持ちません。リクエスト間の調整は
//! 注入された 2 つのストアだけが担います。

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::domain::{Identity, ProjectId, SchedError, Task, TaskId, Viewer};
use crate::ports::{LockKey, LockManager, ProjectRepository, TaskRepository};

use super::policies::{Policies, SchedulerSettings};
use super::policy::SchedulerPolicy;
use super::selection::{SelectRequest, Selection};

/// Scheduler はポリシーの解決と実行を担う
///
/// clone してタスク間で共有できる（中身は Arc のポート）
#[derive(Clone)]
pub struct Scheduler {
    projects: Arc<dyn ProjectRepository>,
    tasks: Arc<dyn TaskRepository>,
    locks: Arc<dyn LockManager>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        tasks: Arc<dyn TaskRepository>,
        locks: Arc<dyn LockManager>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            projects,
            tasks,
            locks,
            settings,
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    fn policies(&self) -> Policies<'_> {
        Policies {
            tasks: self.tasks.as_ref(),
            locks: self.locks.as_ref(),
            settings: self.settings,
        }
    }

    /// 指定ポリシーで選択を実行
    #[instrument(skip(self, req), fields(project_id = %req.project_id, identity = %req.identity))]
    pub async fn select_task(
        &self,
        policy: SchedulerPolicy,
        req: &SelectRequest,
    ) -> Result<Selection, SchedError> {
        let policies = self.policies();
        let selection = match policy {
            SchedulerPolicy::Locked => policies.locked(req).await?,
            SchedulerPolicy::BreadthFirst => policies.breadth_first(req).await?,
            SchedulerPolicy::DepthFirst => policies.depth_first(req).await?,
            SchedulerPolicy::Incremental => policies.incremental(req).await?,
        };
        debug!(%policy, found = selection.tasks().len(), "selection done");
        Ok(selection)
    }

    /// 設定値の名前からポリシーを解決して実行（未知の名前は locked）
    pub async fn select_task_by_name(
        &self,
        policy_name: Option<&str>,
        req: &SelectRequest,
    ) -> Result<Selection, SchedError> {
        self.select_task(SchedulerPolicy::from_name(policy_name), req)
            .await
    }

    /// project に設定されたポリシー
    pub async fn resolve_scheduler(
        &self,
        project_id: ProjectId,
    ) -> Result<SchedulerPolicy, SchedError> {
        let project = self
            .projects
            .get(project_id)
            .await?
            .ok_or(SchedError::ProjectNotFound(project_id))?;
        Ok(SchedulerPolicy::from_name(project.scheduler_name()))
    }

    /// locked ではリース保持者だけが提出できる
    pub async fn can_submit(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<bool, SchedError> {
        if !self.resolve_scheduler(project_id).await?.is_locked() {
            return Ok(true);
        }
        let key = LockKey::for_task(project_id, task_id);
        Ok(self.locks.has(&key, &identity.holder_key()).await?)
    }

    /// locked ではタスクを読めるのは admin / subadmin / リース保持者のみ
    pub async fn can_read(&self, task: &Task, viewer: &Viewer) -> Result<bool, SchedError> {
        if !self.resolve_scheduler(task.project_id).await?.is_locked() {
            return Ok(true);
        }
        if viewer.has_elevated_read() {
            return Ok(true);
        }
        let key = LockKey::for_task(task.project_id, task.id);
        Ok(self.locks.has(&key, &viewer.identity.holder_key()).await?)
    }

    /// TaskRun 永続化後のフック（locked ならリースを解放）
    #[instrument(skip(self))]
    pub async fn on_submitted(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<(), SchedError> {
        if !self.resolve_scheduler(project_id).await?.is_locked() {
            return Ok(());
        }
        let key = LockKey::for_task(project_id, task_id);
        self.locks.release(&key, &identity.holder_key()).await?;
        info!(%key, "lease released after submission");
        Ok(())
    }
}
