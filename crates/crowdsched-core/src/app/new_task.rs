//! NewTaskService - 「次のタスク」取得とその周辺
//!
//! # フロー（new_task）
//! 1. project を取得（無ければ NotFound）
//! 2. 匿名不可プロジェクトへの匿名リクエストには擬似タスクを返す
//! 3. limit / offset / orderby / desc を正規化
//! 4. project の設定ポリシーで選択
//! 5. 返すタスクすべてに ContributionsGuard でスタンプ
//!
//! 応答は 0 件 → `{}`、1 件 → object、複数 → array です。

use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, instrument};

use crate::domain::{
    Identity, ProjectId, Project, Role, SchedError, Task, TaskId, TaskOrder, UserId, Viewer,
};
use crate::ports::{ContributionsGuard, ProjectRepository, TaskRepository};
use crate::sched::{Scheduler, SelectRequest, Selection};

/// `limit` の上限
pub const MAX_LIMIT: u32 = 100;

/// 匿名不可プロジェクトの擬似タスクに載せるメッセージ
pub const ANONYMOUS_NOT_ALLOWED: &str = "This project does not allow anonymous contributors";

/// NewTaskRequest は new-task のクエリパラメータ
///
/// 未指定の値は `limit=1`、`offset=0`、`orderby=id`、`desc=false` として扱う
#[derive(Debug, Clone, Deserialize)]
pub struct NewTaskRequest {
    pub project_id: ProjectId,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub orderby: Option<String>,
    #[serde(default)]
    pub desc: Option<bool>,
    #[serde(default)]
    pub external_uid: Option<String>,
}

impl NewTaskRequest {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            limit: None,
            offset: None,
            orderby: None,
            desc: None,
            external_uid: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn orderby(mut self, orderby: impl Into<String>, desc: bool) -> Self {
        self.orderby = Some(orderby.into());
        self.desc = Some(desc);
        self
    }

    pub fn external_uid(mut self, uid: impl Into<String>) -> Self {
        self.external_uid = Some(uid.into());
        self
    }

    fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(1).min(MAX_LIMIT)
    }

    /// 並び順（未指定なら `id` 昇順）
    ///
    /// 許可リスト外の `orderby` は InvalidRequest
    fn effective_order(&self) -> Result<TaskOrder, SchedError> {
        TaskOrder::parse(
            self.orderby.as_deref().unwrap_or("id"),
            self.desc.unwrap_or(false),
        )
    }
}

/// Requester は Web 層から見た呼び出し元（Identity 解決前）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Option<UserId>,
    pub remote_addr: Option<String>,
    pub role: Role,
}

impl Requester {
    pub fn registered(user_id: UserId, role: Role) -> Self {
        Self {
            user_id: Some(user_id),
            remote_addr: None,
            role,
        }
    }

    pub fn anonymous(remote_addr: Option<&str>) -> Self {
        Self {
            user_id: None,
            remote_addr: remote_addr.map(str::to_string),
            role: Role::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// 貢献者 Identity を解決
    ///
    /// リモートアドレスは匿名の呼び出し元でのみ使う
    pub fn identity(&self, external_uid: Option<&str>) -> Identity {
        let ip = if self.is_anonymous() {
            self.remote_addr.as_deref()
        } else {
            None
        };
        Identity::resolve(self.user_id, ip, external_uid)
    }

    pub fn viewer(&self) -> Viewer {
        Viewer::new(self.identity(None), self.role)
    }
}

/// NewTaskResponse は new-task 応答のワイヤ形式
#[derive(Debug, Clone, PartialEq)]
pub enum NewTaskResponse {
    Empty,
    One(Task),
    Many(Vec<Task>),
    /// 匿名の呼び出し元にサインインを促す擬似タスク
    AnonymousNotAllowed,
}

impl NewTaskResponse {
    pub fn from_tasks(mut tasks: Vec<Task>) -> Self {
        match tasks.len() {
            0 => Self::Empty,
            1 => Self::One(tasks.remove(0)),
            _ => Self::Many(tasks),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        match self {
            Self::One(task) => std::slice::from_ref(task),
            Self::Many(tasks) => tasks,
            Self::Empty | Self::AnonymousNotAllowed => &[],
        }
    }
}

impl From<Selection> for NewTaskResponse {
    fn from(selection: Selection) -> Self {
        Self::from_tasks(selection.into_tasks())
    }
}

impl Serialize for NewTaskResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_map(Some(0))?.end(),
            Self::One(task) => task.serialize(serializer),
            Self::Many(tasks) => tasks.serialize(serializer),
            Self::AnonymousNotAllowed => {
                serde_json::json!({ "info": { "error": ANONYMOUS_NOT_ALLOWED } })
                    .serialize(serializer)
            }
        }
    }
}

/// プロジェクトの指定方法（id または short_name）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    Id(ProjectId),
    ShortName(String),
}

/// 呼び出し元の回答数とプロジェクトのタスク総数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub done: i64,
    pub total: i64,
}

/// NewTaskService は new-task 系の操作をまとめる
#[derive(Clone)]
pub struct NewTaskService {
    scheduler: Scheduler,
    projects: Arc<dyn ProjectRepository>,
    tasks: Arc<dyn TaskRepository>,
    guard: Arc<dyn ContributionsGuard>,
}

impl NewTaskService {
    pub fn new(
        scheduler: Scheduler,
        projects: Arc<dyn ProjectRepository>,
        tasks: Arc<dyn TaskRepository>,
        guard: Arc<dyn ContributionsGuard>,
    ) -> Self {
        Self {
            scheduler,
            projects,
            tasks,
            guard,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    async fn project(&self, project_ref: &ProjectRef) -> Result<Project, SchedError> {
        match project_ref {
            ProjectRef::Id(id) => self
                .projects
                .get(*id)
                .await?
                .ok_or(SchedError::ProjectNotFound(*id)),
            ProjectRef::ShortName(name) => self
                .projects
                .get_by_short_name(name)
                .await?
                .ok_or_else(|| SchedError::ProjectNameNotFound(name.clone())),
        }
    }

    #[instrument(skip(self, req, requester), fields(project_id = %req.project_id))]
    pub async fn new_task(
        &self,
        req: &NewTaskRequest,
        requester: &Requester,
    ) -> Result<NewTaskResponse, SchedError> {
        let project = self.project(&ProjectRef::Id(req.project_id)).await?;
        if !project.allow_anonymous_contributors && requester.is_anonymous() {
            debug!("anonymous request on a registered-only project");
            return Ok(NewTaskResponse::AnonymousNotAllowed);
        }

        let identity = requester.identity(req.external_uid.as_deref());
        let select = SelectRequest::new(project.id, identity.clone())
            .page(req.effective_limit(), req.offset.unwrap_or(0))
            .order(req.effective_order()?);

        let selection = self
            .scheduler
            .select_task_by_name(project.scheduler_name(), &select)
            .await?;
        for task in selection.tasks() {
            self.guard.stamp(task.id, &identity).await?;
        }
        info!(%identity, served = selection.tasks().len(), "new task request served");
        Ok(selection.into())
    }

    /// 提出成功時のコールバック（locked ならリースを解放）
    pub async fn task_submitted(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        identity: &Identity,
    ) -> Result<(), SchedError> {
        self.scheduler.on_submitted(project_id, task_id, identity).await
    }

    /// タスクの提示時刻を記録し、書き込んだかどうかを返す
    ///
    /// - 登録ユーザーで未記録なら記録
    /// - `force` なら匿名を含め常に上書き
    /// - それ以外は何もしない
    pub async fn cache_presented_time(
        &self,
        task_id: TaskId,
        requester: &Requester,
        force: bool,
    ) -> Result<bool, SchedError> {
        let identity = requester.identity(None);
        let first_visit = !requester.is_anonymous()
            && !self.guard.check_presented_timestamp(task_id, &identity).await?;
        if !(first_visit || force) {
            return Ok(false);
        }
        self.guard.stamp_presented_time(task_id, &identity).await?;
        Ok(true)
    }

    /// 呼び出し元の進捗（回答済み数 / タスク総数）
    pub async fn user_progress(
        &self,
        project_ref: &ProjectRef,
        requester: &Requester,
    ) -> Result<UserProgress, SchedError> {
        let project = self.project(project_ref).await?;
        let identity = requester.identity(None);
        let done = self
            .tasks
            .count_task_runs_matching(project.id, &identity)
            .await?;
        let total = self.tasks.count_tasks(project.id).await?;
        Ok(UserProgress { done, total })
    }
}
