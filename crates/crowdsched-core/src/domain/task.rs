use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::Identity;
use super::ids::{ProjectId, TaskId, UserId};

/// Lifecycle state of a task.
///
/// The transition to `Completed` belongs to whoever persists task runs; the
/// scheduler only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Ongoing,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        }
    }
}

/// A unit of work handed to contributors.
///
/// Serialized with the historical column names (`priority_0`), which is the
/// payload the new-task surface returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub state: TaskState,
    #[serde(default)]
    pub info: serde_json::Value,
    /// Number of distinct completions required before the task is retired.
    pub n_answers: i64,
    #[serde(rename = "priority_0")]
    pub priority: f64,
    #[serde(default)]
    pub calibration: bool,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub fav_user_ids: Vec<UserId>,
}

impl Task {
    pub fn new(id: TaskId, project_id: ProjectId, info: serde_json::Value) -> Self {
        Self {
            id,
            project_id,
            state: TaskState::Ongoing,
            info,
            n_answers: 30,
            priority: 0.0,
            calibration: false,
            created: Utc::now(),
            fav_user_ids: Vec::new(),
        }
    }

    pub fn with_n_answers(mut self, n_answers: i64) -> Self {
        self.n_answers = n_answers;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    pub fn with_fav_user_ids(mut self, fav_user_ids: Vec<UserId>) -> Self {
        self.fav_user_ids = fav_user_ids;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    pub fn fav_count(&self) -> usize {
        self.fav_user_ids.len()
    }

    /// Attach the previous answer to the payload (incremental scheduling).
    ///
    /// Non-object payloads are wrapped so the answer is never dropped.
    pub fn attach_last_answer(&mut self, answer: serde_json::Value) {
        if !self.info.is_object() {
            let original = std::mem::take(&mut self.info);
            self.info = if original.is_null() {
                serde_json::json!({})
            } else {
                serde_json::json!({ "value": original })
            };
        }
        if let Some(map) = self.info.as_object_mut() {
            map.insert("last_answer".to_string(), answer);
        }
    }
}

/// One identity's answer for a task. Read-only from the scheduler's view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub identity: Identity,
    #[serde(default)]
    pub info: serde_json::Value,
    pub finish_time: DateTime<Utc>,
}

impl TaskRun {
    pub fn new(task: &Task, identity: Identity, info: serde_json::Value) -> Self {
        Self {
            task_id: task.id,
            project_id: task.project_id,
            identity,
            info,
            finish_time: Utc::now(),
        }
    }

    pub fn finished_at(mut self, finish_time: DateTime<Utc>) -> Self {
        self.finish_time = finish_time;
        self
    }
}

/// A task row as read by the locked policy: the task plus its answer tally.
#[derive(Debug, Clone, PartialEq)]
pub struct LockCandidate {
    pub task_id: TaskId,
    /// TaskRuns from every identity.
    pub task_runs: i64,
    pub n_answers: i64,
}

impl LockCandidate {
    /// How many more identities may hold the task concurrently.
    pub fn remaining(&self) -> i64 {
        self.n_answers - self.task_runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(TaskId::new(1), ProjectId::new(1), serde_json::json!({"q": "x"}))
    }

    #[test]
    fn serializes_with_historical_field_names() {
        let value = serde_json::to_value(task().with_priority(0.5)).unwrap();
        assert_eq!(value["priority_0"], 0.5);
        assert_eq!(value["state"], "ongoing");
        assert_eq!(value["id"], 1);
        assert!(value.get("priority").is_none());
    }

    #[test]
    fn last_answer_is_merged_into_object_info() {
        let mut task = task();
        task.attach_last_answer(serde_json::json!({"a": 1}));
        assert_eq!(task.info["q"], "x");
        assert_eq!(task.info["last_answer"]["a"], 1);
    }

    #[test]
    fn last_answer_wraps_scalar_info() {
        let mut task = Task::new(TaskId::new(1), ProjectId::new(1), serde_json::json!("raw"));
        task.attach_last_answer(serde_json::json!("prev"));
        assert_eq!(task.info["value"], "raw");
        assert_eq!(task.info["last_answer"], "prev");
    }

    #[test]
    fn remaining_quota_subtracts_existing_runs() {
        let candidate = LockCandidate {
            task_id: TaskId::new(1),
            task_runs: 2,
            n_answers: 3,
        };
        assert_eq!(candidate.remaining(), 1);
    }
}
