//! Policies - 4 つの選択ルール
//!
//! # 設計原則
//! - どのポリシーも `select(request) -> Selection` という同じ操作
//! - 違うのは候補の選び方だけ
//! - ポリシーの決定は dispatcher の仕事で、ここでは project のメタデータを見ない

use rand::Rng;
use tracing::debug;

use crate::domain::{SchedError, TaskOrder};
use crate::ports::{CandidateQuery, LockKey, LockManager, TaskRepository};

use super::selection::{SelectRequest, Selection};

/// locked ポリシーが受け付ける offset の上限
pub const LOCKED_MAX_OFFSET: u32 = 2;

/// ポリシーの調整値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// locked が 1 リクエストで試す候補行数
    pub locked_batch: u32,
    /// incremental が抽選する候補プールの大きさ
    pub incremental_pool: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            locked_batch: 10,
            incremental_pool: 100,
        }
    }
}

pub(crate) struct Policies<'a> {
    pub tasks: &'a dyn TaskRepository,
    pub locks: &'a dyn LockManager,
    pub settings: SchedulerSettings,
}

impl Policies<'_> {
    fn candidate_query(req: &SelectRequest, default_order: TaskOrder) -> CandidateQuery {
        CandidateQuery::new(req.project_id, req.identity.clone())
            .order(req.order.unwrap_or(default_order))
            .page(req.limit, req.offset)
    }

    /// 候補セレクタの結果をそのまま返す（ロックなし）
    pub async fn depth_first(&self, req: &SelectRequest) -> Result<Selection, SchedError> {
        let query = Self::candidate_query(req, TaskOrder::by_priority());
        let tasks = self.tasks.candidates(&query).await?;
        Ok(Selection::from_tasks(tasks))
    }

    /// 全体で回答数の少ないタスクから返す
    pub async fn breadth_first(&self, req: &SelectRequest) -> Result<Selection, SchedError> {
        let query = Self::candidate_query(req, TaskOrder::by_id());
        let tasks = self.tasks.breadth_first_candidates(&query).await?;
        Ok(Selection::from_tasks(tasks))
    }

    /// 優先度順のプールから 1 件を一様に抽選
    ///
    /// 直近の回答を `info.last_answer` として添える。
    /// リクエストの `limit` / `offset` / `order` は無視する
    pub async fn incremental(&self, req: &SelectRequest) -> Result<Selection, SchedError> {
        let query = CandidateQuery::new(req.project_id, req.identity.clone())
            .order(TaskOrder::by_priority())
            .page(self.settings.incremental_pool, 0);
        let mut candidates = self.tasks.candidates(&query).await?;
        if candidates.is_empty() {
            return Ok(Selection::NoneAvailable);
        }

        let idx = rand::thread_rng().gen_range(0..candidates.len());
        let mut task = candidates.swap_remove(idx);
        if let Some(last) = self.tasks.last_task_run(task.id).await? {
            task.attach_last_answer(last.info);
        }
        debug!(task_id = %task.id, pool = candidates.len() + 1, "incremental pick");
        Ok(Selection::Found(vec![task]))
    }

    /// アドミッション制御付きの選択
    ///
    /// # 手順
    /// 1. 候補を `priority DESC, id ASC` で走査
    /// 2. 各タスクを quota `n_answers - task_runs` でリース
    /// 3. `offset` 番目（0 始まり）に取れたリースのタスクを返す
    ///
    /// 手前の行で取れたリースは解放せず TTL で失効させる。
    /// タスクがリース取得後に消えていた場合はそのリースを解放する
    pub async fn locked(&self, req: &SelectRequest) -> Result<Selection, SchedError> {
        if req.offset > LOCKED_MAX_OFFSET {
            return Err(SchedError::InvalidRequest(format!(
                "offset {} exceeds {} for the locked scheduler",
                req.offset, LOCKED_MAX_OFFSET
            )));
        }

        let rows = self
            .tasks
            .locked_candidates(req.project_id, &req.identity, self.settings.locked_batch)
            .await?;
        let holder = req.identity.holder_key();

        let mut skipped = 0;
        for row in rows {
            let key = LockKey::for_task(req.project_id, row.task_id);
            let quota = row.remaining();
            if !self.locks.acquire(&key, &holder, quota).await? {
                debug!(task_id = %row.task_id, quota, "lease denied");
                continue;
            }
            if skipped == req.offset {
                debug!(task_id = %row.task_id, quota, "lease granted");
                return match self.tasks.get_task(row.task_id).await? {
                    Some(task) => Ok(Selection::Found(vec![task])),
                    None => {
                        debug!(task_id = %row.task_id, "leased task vanished");
                        self.locks.release(&key, &holder).await?;
                        Ok(Selection::NoneAvailable)
                    }
                };
            }
            skipped += 1;
        }
        Ok(Selection::NoneAvailable)
    }
}
