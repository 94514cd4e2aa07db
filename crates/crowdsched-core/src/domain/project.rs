use serde::{Deserialize, Serialize};

use super::ids::ProjectId;

/// Project metadata the scheduler consults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub short_name: String,
    pub allow_anonymous_contributors: bool,
    /// Free-form metadata. `info.sched` selects the scheduling policy.
    #[serde(default)]
    pub info: serde_json::Value,
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
}

impl Project {
    pub fn new(id: ProjectId, short_name: impl Into<String>) -> Self {
        Self {
            id,
            short_name: short_name.into(),
            allow_anonymous_contributors: true,
            info: serde_json::json!({}),
            secret_key: None,
        }
    }

    pub fn with_scheduler(mut self, sched: &str) -> Self {
        if !self.info.is_object() {
            self.info = serde_json::json!({});
        }
        if let Some(map) = self.info.as_object_mut() {
            map.insert("sched".to_string(), serde_json::Value::from(sched));
        }
        self
    }

    pub fn with_anonymous(mut self, allowed: bool) -> Self {
        self.allow_anonymous_contributors = allowed;
        self
    }

    /// Raw configured policy name, if any.
    pub fn scheduler_name(&self) -> Option<&str> {
        self.info.get("sched").and_then(|v| v.as_str())
    }
}
