//! TaskRepository / ProjectRepository port - リレーショナルストアの読み取り
//!
//! スケジューラから見たリレーショナルストアは読み取り専用です。
//! TaskRun の挿入や state の completed への遷移は外部コラボレータの責務です。

use async_trait::async_trait;

use crate::domain::{
    Identity, LockCandidate, Project, ProjectId, RepoError, Task, TaskId, TaskOrder, TaskRun,
};

/// 候補セレクタの入力
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub project_id: ProjectId,
    pub identity: Identity,
    pub order: TaskOrder,
    pub limit: u32,
    pub offset: u32,
}

impl CandidateQuery {
    pub fn new(project_id: ProjectId, identity: Identity) -> Self {
        Self {
            project_id,
            identity,
            order: TaskOrder::default(),
            limit: 1,
            offset: 0,
        }
    }

    pub fn order(mut self, order: TaskOrder) -> Self {
        self.order = order;
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// タスク側の読み取り
///
/// どの候補クエリも `completed` のタスクと、`identity` の TaskRun が既にある
/// タスク（照合は identity 自身のチャネルのみ）を除外する
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 指定順の候補（最後のタイブレークは `id ASC`）
    async fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Task>, RepoError>;

    /// TaskRun 総数（Counter）昇順 → 指定順 → `id ASC` の候補
    async fn breadth_first_candidates(&self, query: &CandidateQuery)
    -> Result<Vec<Task>, RepoError>;

    /// `priority DESC, id ASC` で最大 `batch` 件、TaskRun 数と quota つき
    async fn locked_candidates(
        &self,
        project_id: ProjectId,
        identity: &Identity,
        batch: u32,
    ) -> Result<Vec<LockCandidate>, RepoError>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>, RepoError>;

    /// 完了時刻が最新の TaskRun（誰の回答でも）
    async fn last_task_run(&self, task_id: TaskId) -> Result<Option<TaskRun>, RepoError>;

    async fn count_task_runs_matching(
        &self,
        project_id: ProjectId,
        identity: &Identity,
    ) -> Result<i64, RepoError>;

    async fn count_tasks(&self, project_id: ProjectId) -> Result<i64, RepoError>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>, RepoError>;

    async fn get_by_short_name(&self, short_name: &str) -> Result<Option<Project>, RepoError>;
}
