use std::env;

use serde::{Deserialize, Serialize};

use crate::sched::SchedulerSettings;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Scheduler config ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedConfig {
    /// Lease and contribution-stamp lifetime in seconds.
    pub lock_ttl_secs: u64,
    pub locked_batch: u32,
    pub incremental_pool: u32,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 3600,
            locked_batch: 10,
            incremental_pool: 100,
            redis_url: None,
            database_url: None,
        }
    }
}

impl SchedConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|s| !s.is_empty());
        let defaults = Self::default();
        Self {
            lock_ttl_secs: parse_or(get("CROWDSCHED_LOCK_TTL_SECS"), defaults.lock_ttl_secs),
            locked_batch: parse_or(get("CROWDSCHED_LOCKED_BATCH"), defaults.locked_batch),
            incremental_pool: parse_or(
                get("CROWDSCHED_INCREMENTAL_POOL"),
                defaults.incremental_pool,
            ),
            redis_url: get("REDIS_URL"),
            database_url: get("DATABASE_URL"),
        }
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.lock_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            locked_batch: self.locked_batch.max(1),
            incremental_pool: self.incremental_pool.max(1),
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  locks:       ttl={}s", self.lock_ttl_secs);
        tracing::info!(
            "  scheduler:   locked_batch={}, incremental_pool={}",
            self.locked_batch,
            self.incremental_pool
        );
        tracing::info!(
            "  redis:       {}",
            self.redis_url.as_deref().map(redact_url).unwrap_or_else(|| "(in-memory)".into())
        );
        tracing::info!(
            "  postgres:    {}",
            self.database_url.as_deref().map(redact_url).unwrap_or_else(|| "(in-memory)".into())
        );
    }
}

/// Hide the userinfo part of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SchedConfig::from_lookup(lookup(&[]));
        assert_eq!(config, SchedConfig::default());
        assert_eq!(config.lock_ttl(), chrono::Duration::seconds(3600));
    }

    #[test]
    fn reads_overrides() {
        let config = SchedConfig::from_lookup(lookup(&[
            ("CROWDSCHED_LOCK_TTL_SECS", "120"),
            ("CROWDSCHED_LOCKED_BATCH", "5"),
            ("CROWDSCHED_INCREMENTAL_POOL", "20"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("DATABASE_URL", ""),
        ]));
        assert_eq!(config.lock_ttl_secs, 120);
        assert_eq!(
            config.scheduler_settings(),
            SchedulerSettings {
                locked_batch: 5,
                incremental_pool: 20
            }
        );
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = SchedConfig::from_lookup(lookup(&[("CROWDSCHED_LOCKED_BATCH", "ten")]));
        assert_eq!(config.locked_batch, 10);
    }

    #[rstest]
    #[case("postgres://app:hunter2@db:5432/pybossa", "postgres://***@db:5432/pybossa")]
    #[case("redis://:secret@cache:6379/0", "redis://***@cache:6379/0")]
    #[case("redis://cache:6379", "redis://cache:6379")]
    #[case("not a url", "not a url")]
    fn redacts_credentials(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(redact_url(url), expected);
    }
}
