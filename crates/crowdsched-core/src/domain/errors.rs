//! Errors - エラー型と分類
//!
//! ポート境界（ロックストア・リレーショナルストア・contributions guard）ごとに
//! エラー型を持ち、スケジューラ境界では `SchedError` に集約します。
//! インフラ障害は「候補なし」や「ロック拒否」と決して混同しません。

use thiserror::Error;

use super::ids::ProjectId;

/// ErrorKind は呼び出し側向けの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// クライアントの誤り（リトライ無意味）
    InvalidRequest,
    /// 存在しないプロジェクトなど
    NotFound,
    /// PG/Redis の障害
    Infrastructure,
}

/// ロックストアの失敗
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),

    #[error("lock store returned an unexpected reply: {0}")]
    Protocol(String),
}

/// リレーショナルストアの失敗
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("row decode failed: {0}")]
    Decode(String),
}

/// ContributionsGuard（提示時刻スタンプ）の失敗
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("stamp store unavailable: {0}")]
    Unavailable(String),
}

/// 共有ストアいずれかのインフラ障害
#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Guard(#[from] GuardError),
}

/// Scheduler と new-task が返すエラー
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("project not found: {0}")]
    ProjectNameNotFound(String),

    #[error("infrastructure failure: {0}")]
    Infrastructure(#[from] InfraError),
}

impl SchedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::ProjectNotFound(_) | Self::ProjectNameNotFound(_) => ErrorKind::NotFound,
            Self::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// API 層向けの HTTP ステータスコード
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Infrastructure => 503,
        }
    }
}

impl From<LockError> for SchedError {
    fn from(e: LockError) -> Self {
        Self::Infrastructure(e.into())
    }
}

impl From<RepoError> for SchedError {
    fn from(e: RepoError) -> Self {
        Self::Infrastructure(e.into())
    }
}

impl From<GuardError> for SchedError {
    fn from(e: GuardError) -> Self {
        Self::Infrastructure(e.into())
    }
}
