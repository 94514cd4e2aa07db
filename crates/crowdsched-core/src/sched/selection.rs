//! Selection - ポリシーへの入力と出力

use crate::domain::{Identity, ProjectId, Task, TaskOrder};

/// SelectRequest は全ポリシー共通の引数
#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub project_id: ProjectId,
    pub identity: Identity,
    pub offset: u32,
    pub limit: u32,
    /// `None` ならポリシー既定の並び順
    pub order: Option<TaskOrder>,
}

impl SelectRequest {
    pub fn new(project_id: ProjectId, identity: Identity) -> Self {
        Self {
            project_id,
            identity,
            offset: 0,
            limit: 1,
            order: None,
        }
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn order(mut self, order: TaskOrder) -> Self {
        self.order = Some(order);
        self
    }
}

/// Selection は選択の結果
///
/// 「今は渡せるタスクが無い」はエラーではなく NoneAvailable
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Found(Vec<Task>),
    NoneAvailable,
}

impl Selection {
    /// 空の結果は [`Selection::NoneAvailable`] に正規化
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        if tasks.is_empty() {
            Self::NoneAvailable
        } else {
            Self::Found(tasks)
        }
    }

    pub fn tasks(&self) -> &[Task] {
        match self {
            Self::Found(tasks) => tasks,
            Self::NoneAvailable => &[],
        }
    }

    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            Self::Found(tasks) => tasks,
            Self::NoneAvailable => Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::NoneAvailable)
    }
}
