//! InMemoryTaskStore - 開発・テスト用のリレーショナルストア
//!
//! project / task / task_run / counter の 4 テーブルを HashMap と Vec で持ちます。
//! 並び順・除外条件は PostgreSQL 実装の SQL と同じ意味になるようにしています。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    Identity, LockCandidate, OrderField, Project, ProjectId, RepoError, Task, TaskId, TaskOrder,
    TaskRun,
};
use crate::ports::{CandidateQuery, ProjectRepository, TaskRepository};

#[derive(Default)]
struct StoreState {
    projects: HashMap<ProjectId, Project>,
    /// BTreeMap なので走査順は id 順
    tasks: BTreeMap<TaskId, Task>,
    task_runs: Vec<TaskRun>,
    /// TaskRun 数の非正規化集計（`counter` テーブル相当）
    counters: HashMap<TaskId, i64>,
}

impl StoreState {
    fn attempted_by(&self, project_id: ProjectId, identity: &Identity) -> HashSet<TaskId> {
        self.task_runs
            .iter()
            .filter(|run| run.project_id == project_id && &run.identity == identity)
            .map(|run| run.task_id)
            .collect()
    }

    /// `identity` が未回答の進行中タスク
    fn eligible(&self, project_id: ProjectId, identity: &Identity) -> Vec<&Task> {
        let attempted = self.attempted_by(project_id, identity);
        self.tasks
            .values()
            .filter(|t| t.project_id == project_id && !t.is_completed())
            .filter(|t| !attempted.contains(&t.id))
            .collect()
    }

    fn runs_for(&self, task_id: TaskId) -> i64 {
        self.task_runs.iter().filter(|r| r.task_id == task_id).count() as i64
    }

    fn counter(&self, task_id: TaskId) -> i64 {
        self.counters.get(&task_id).copied().unwrap_or(0)
    }

    fn percent_complete(&self, task: &Task) -> f64 {
        if task.n_answers <= 0 {
            return 0.0;
        }
        self.counter(task.id) as f64 / task.n_answers as f64
    }

    fn compare(&self, order: TaskOrder, a: &Task, b: &Task) -> Ordering {
        let primary = match order.field {
            OrderField::Id => a.id.cmp(&b.id),
            OrderField::Priority => a.priority.total_cmp(&b.priority),
            OrderField::Created => a.created.cmp(&b.created),
            OrderField::FavCount => a.fav_count().cmp(&b.fav_count()),
            OrderField::PercentComplete => self
                .percent_complete(a)
                .total_cmp(&self.percent_complete(b)),
        };
        let primary = if order.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

fn page(tasks: Vec<&Task>, limit: u32, offset: u32) -> Vec<Task> {
    tasks
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect()
}

/// InMemoryTaskStore は両リポジトリポートのインメモリ実装
#[derive(Clone)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<StoreState>>,
    available: Arc<AtomicBool>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), RepoError> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(RepoError::Unavailable("in-memory store is offline".into()))
        }
    }

    pub async fn insert_project(&self, project: Project) {
        let mut state = self.state.write().await;
        state.projects.insert(project.id, project);
    }

    pub async fn insert_task(&self, task: Task) {
        let mut state = self.state.write().await;
        state.counters.entry(task.id).or_insert(0);
        state.tasks.insert(task.id, task);
    }

    /// TaskRun を保存して counter を加算（提出エンドポイントと同じ）
    pub async fn insert_task_run(&self, run: TaskRun) {
        let mut state = self.state.write().await;
        *state.counters.entry(run.task_id).or_insert(0) += 1;
        state.task_runs.push(run);
    }

    /// 集計値を直接上書き
    pub async fn set_counter(&self, task_id: TaskId, n_task_runs: i64) {
        let mut state = self.state.write().await;
        state.counters.insert(task_id, n_task_runs);
    }

    /// タスクの TaskRun 数
    pub async fn task_run_count(&self, task_id: TaskId) -> i64 {
        self.state.read().await.runs_for(task_id)
    }

    pub async fn update_task<F>(&self, task_id: TaskId, f: F)
    where
        F: FnOnce(&mut Task),
    {
        let mut state = self.state.write().await;
        if let Some(task) = state.tasks.get_mut(&task_id) {
            f(task);
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskStore {
    async fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Task>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut tasks = state.eligible(query.project_id, &query.identity);
        tasks.sort_by(|a, b| state.compare(query.order, a, b));
        Ok(page(tasks, query.limit, query.offset))
    }

    async fn breadth_first_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Task>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut tasks = state.eligible(query.project_id, &query.identity);
        tasks.sort_by(|a, b| {
            state
                .counter(a.id)
                .cmp(&state.counter(b.id))
                .then_with(|| state.compare(query.order, a, b))
        });
        Ok(page(tasks, query.limit, query.offset))
    }

    async fn locked_candidates(
        &self,
        project_id: ProjectId,
        identity: &Identity,
        batch: u32,
    ) -> Result<Vec<LockCandidate>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut tasks = state.eligible(project_id, identity);
        tasks.sort_by(|a, b| state.compare(TaskOrder::by_priority(), a, b));
        Ok(tasks
            .into_iter()
            .take(batch as usize)
            .map(|t| LockCandidate {
                task_id: t.id,
                task_runs: state.runs_for(t.id),
                n_answers: t.n_answers,
            })
            .collect())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state.tasks.get(&task_id).cloned())
    }

    async fn last_task_run(&self, task_id: TaskId) -> Result<Option<TaskRun>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .task_runs
            .iter()
            .filter(|r| r.task_id == task_id)
            .max_by_key(|r| r.finish_time)
            .cloned())
    }

    async fn count_task_runs_matching(
        &self,
        project_id: ProjectId,
        identity: &Identity,
    ) -> Result<i64, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .task_runs
            .iter()
            .filter(|r| r.project_id == project_id && &r.identity == identity)
            .count() as i64)
    }

    async fn count_tasks(&self, project_id: ProjectId) -> Result<i64, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .count() as i64)
    }
}

#[async_trait]
impl ProjectRepository for InMemoryTaskStore {
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state.projects.get(&project_id).cloned())
    }

    async fn get_by_short_name(&self, short_name: &str) -> Result<Option<Project>, RepoError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .projects
            .values()
            .find(|p| p.short_name == short_name)
            .cloned())
    }
}
