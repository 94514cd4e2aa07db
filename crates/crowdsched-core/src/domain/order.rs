//! Order - 候補タスクの並び順
//!
//! 並び替えに使えるフィールドは固定の許可リストのみです。
//! どの並び順でも最後に `id ASC` を付けて、ページをまたいだ順序を決定的にします。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::SchedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    Id,
    /// `priority_0`
    Priority,
    Created,
    /// `fav_user_ids` の長さ
    FavCount,
    /// TaskRun 数 / `n_answers`
    PercentComplete,
}

impl OrderField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Priority => "priority_0",
            Self::Created => "created",
            Self::FavCount => "fav_user_ids",
            Self::PercentComplete => "pcomplete",
        }
    }
}

impl FromStr for OrderField {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "priority_0" | "priority" => Ok(Self::Priority),
            "created" => Ok(Self::Created),
            "fav_user_ids" | "n_favs" => Ok(Self::FavCount),
            "pcomplete" => Ok(Self::PercentComplete),
            other => Err(SchedError::InvalidRequest(format!(
                "cannot order tasks by '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 候補タスクの並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOrder {
    pub field: OrderField,
    pub descending: bool,
}

impl TaskOrder {
    pub fn new(field: OrderField, descending: bool) -> Self {
        Self { field, descending }
    }

    pub fn asc(field: OrderField) -> Self {
        Self::new(field, false)
    }

    pub fn desc(field: OrderField) -> Self {
        Self::new(field, true)
    }

    /// new-task の既定: `id` 昇順
    pub fn by_id() -> Self {
        Self::asc(OrderField::Id)
    }

    /// depth-first と incremental の既定: 優先度降順
    pub fn by_priority() -> Self {
        Self::desc(OrderField::Priority)
    }

    /// リクエストの `orderby` / `desc` を解釈（許可リスト外は InvalidRequest）
    pub fn parse(orderby: &str, descending: bool) -> Result<Self, SchedError> {
        Ok(Self::new(orderby.parse()?, descending))
    }
}

impl Default for TaskOrder {
    fn default() -> Self {
        Self::by_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("id", OrderField::Id)]
    #[case("priority_0", OrderField::Priority)]
    #[case("created", OrderField::Created)]
    #[case("fav_user_ids", OrderField::FavCount)]
    #[case("pcomplete", OrderField::PercentComplete)]
    fn parses_allow_listed_fields(#[case] raw: &str, #[case] expected: OrderField) {
        assert_eq!(raw.parse::<OrderField>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = TaskOrder::parse("info; drop table task", false).unwrap_err();
        assert!(matches!(err, SchedError::InvalidRequest(_)));
    }

    #[test]
    fn default_is_id_ascending() {
        assert_eq!(TaskOrder::default(), TaskOrder::asc(OrderField::Id));
    }
}
