//! PostgreSQL repository (requires the `postgres` Cargo feature).
//!
//! [`PgTaskStore`] implements both repository ports over a `PgPool`.
//! Expected tables: `project`, `task`, `task_run`, `counter` (see
//! `migrations/`). Keys are `INTEGER` and timestamps are ISO-8601 `TEXT`,
//! as in the platform's own schema; rows are widened to the domain types here.
//! ORDER BY expressions come from the fixed allow-list in [`order_expr`];
//! nothing from the request is interpolated into SQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::{debug, info};

use crate::domain::{
    Identity, LockCandidate, OrderField, Project, ProjectId, RepoError, Task, TaskId, TaskOrder,
    TaskRun, TaskState, UserId,
};
use crate::ports::{CandidateQuery, ProjectRepository, TaskRepository};

const TASK_COLUMNS: &str = "task.id, task.project_id, task.state, task.info, task.n_answers, \
     task.priority_0, task.calibration, task.created, task.fav_user_ids";

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(e.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(e.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

/// SQL expression for an allow-listed ordering field.
fn order_expr(field: OrderField) -> &'static str {
    match field {
        OrderField::Id => "task.id",
        OrderField::Priority => "task.priority_0",
        OrderField::Created => "task.created",
        OrderField::FavCount => "COALESCE(array_length(task.fav_user_ids, 1), 0)",
        OrderField::PercentComplete => {
            "COALESCE((SELECT SUM(c.n_task_runs) FROM counter c WHERE c.task_id = task.id), 0)::float8 \
             / GREATEST(task.n_answers, 1)"
        }
    }
}

fn order_clause(order: TaskOrder) -> String {
    let dir = if order.descending { "DESC" } else { "ASC" };
    format!("{} {}, task.id ASC", order_expr(order.field), dir)
}

/// `task_run` column matching the identity's channel.
fn identity_column(identity: &Identity) -> &'static str {
    match identity {
        Identity::Registered(_) => "user_id",
        Identity::Anonymous(_) => "user_ip",
        Identity::External(_) => "external_uid",
    }
}

/// Exclusion of tasks already answered by the identity (bound as `$2`).
fn not_attempted_clause(identity: &Identity) -> String {
    format!(
        "NOT EXISTS (SELECT 1 FROM task_run tr WHERE tr.project_id = $1 \
         AND tr.task_id = task.id AND tr.{} = $2)",
        identity_column(identity)
    )
}

fn bind_identity<'q>(
    query: Query<'q, Postgres, PgArguments>,
    identity: &Identity,
) -> Query<'q, Postgres, PgArguments> {
    match identity {
        Identity::Registered(id) => query.bind(id.get()),
        Identity::Anonymous(ip) => query.bind(ip.clone()),
        Identity::External(uid) => query.bind(uid.clone()),
    }
}

/// Parse a stored timestamp: RFC 3339, or naive ISO-8601 taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// `INTEGER` column widened to the domain's `i64`.
fn int_col(row: &PgRow, column: &str) -> Result<i64, RepoError> {
    Ok(i64::from(row.try_get::<i32, _>(column)?))
}

fn timestamp_col(row: &PgRow, column: &str) -> Result<DateTime<Utc>, RepoError> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw)
        .ok_or_else(|| RepoError::Decode(format!("{column}: unparseable timestamp {raw:?}")))
}

fn task_from_row(row: &PgRow) -> Result<Task, RepoError> {
    let state: String = row.try_get("state")?;
    let state = match state.as_str() {
        "completed" => TaskState::Completed,
        _ => TaskState::Ongoing,
    };
    let favs: Option<Vec<i32>> = row.try_get("fav_user_ids")?;
    Ok(Task {
        id: TaskId::new(int_col(row, "id")?),
        project_id: ProjectId::new(int_col(row, "project_id")?),
        state,
        info: row
            .try_get::<Option<serde_json::Value>, _>("info")?
            .unwrap_or(serde_json::Value::Null),
        n_answers: int_col(row, "n_answers")?,
        priority: row.try_get("priority_0")?,
        calibration: row.try_get::<Option<i32>, _>("calibration")?.unwrap_or(0) != 0,
        created: timestamp_col(row, "created")?,
        fav_user_ids: favs
            .unwrap_or_default()
            .into_iter()
            .map(|id| UserId::new(i64::from(id)))
            .collect(),
    })
}

fn task_run_from_row(row: &PgRow) -> Result<TaskRun, RepoError> {
    let user_id: Option<i32> = row.try_get("user_id")?;
    let user_ip: Option<String> = row.try_get("user_ip")?;
    let external_uid: Option<String> = row.try_get("external_uid")?;
    Ok(TaskRun {
        task_id: TaskId::new(int_col(row, "task_id")?),
        project_id: ProjectId::new(int_col(row, "project_id")?),
        identity: Identity::resolve(
            user_id.map(|id| UserId::new(i64::from(id))),
            user_ip.as_deref(),
            external_uid.as_deref(),
        ),
        info: row
            .try_get::<Option<serde_json::Value>, _>("info")?
            .unwrap_or(serde_json::Value::Null),
        finish_time: timestamp_col(row, "finish_time")?,
    })
}

fn project_from_row(row: &PgRow) -> Result<Project, RepoError> {
    Ok(Project {
        id: ProjectId::new(int_col(row, "id")?),
        short_name: row.try_get("short_name")?,
        allow_anonymous_contributors: row.try_get("allow_anonymous_contributors")?,
        info: row
            .try_get::<Option<serde_json::Value>, _>("info")?
            .unwrap_or_else(|| serde_json::json!({})),
        secret_key: row.try_get("secret_key")?,
    })
}

/// Stateless repository over a shared pool.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, RepoError> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Create the scheduler tables when they do not exist yet.
    pub async fn run_migrations(&self) -> Result<(), RepoError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| RepoError::Query(format!("migration failed: {e}")))?;
        info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for PgTaskStore {
    async fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Task>, RepoError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task \
             WHERE task.project_id = $1 AND task.state != 'completed' AND {} \
             ORDER BY {} LIMIT $3 OFFSET $4",
            not_attempted_clause(&query.identity),
            order_clause(query.order),
        );
        debug!(project_id = %query.project_id, order = %query.order.field, "candidate query");
        let q = sqlx::query(&sql).bind(query.project_id.get());
        let rows = bind_identity(q, &query.identity)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn breadth_first_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Task>, RepoError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS}, SUM(counter.n_task_runs) AS n_task_runs \
             FROM task JOIN counter ON counter.task_id = task.id \
             WHERE task.project_id = $1 AND task.state != 'completed' AND {} \
             GROUP BY task.id \
             ORDER BY n_task_runs ASC, {} LIMIT $3 OFFSET $4",
            not_attempted_clause(&query.identity),
            order_clause(query.order),
        );
        let q = sqlx::query(&sql).bind(query.project_id.get());
        let rows = bind_identity(q, &query.identity)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn locked_candidates(
        &self,
        project_id: ProjectId,
        identity: &Identity,
        batch: u32,
    ) -> Result<Vec<LockCandidate>, RepoError> {
        let sql = format!(
            "SELECT task.id, COUNT(task_run.task_id) AS taskcount, task.n_answers \
             FROM task LEFT JOIN task_run ON task.id = task_run.task_id \
             WHERE task.project_id = $1 AND task.state != 'completed' AND {} \
             GROUP BY task.id \
             ORDER BY task.priority_0 DESC, task.id ASC LIMIT $3",
            not_attempted_clause(identity),
        );
        let q = sqlx::query(&sql).bind(project_id.get());
        let rows = bind_identity(q, identity)
            .bind(i64::from(batch))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<LockCandidate, RepoError> {
                Ok(LockCandidate {
                    task_id: TaskId::new(int_col(row, "id")?),
                    task_runs: row.try_get("taskcount")?,
                    n_answers: int_col(row, "n_answers")?,
                })
            })
            .collect()
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>, RepoError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task WHERE task.id = $1");
        let row = sqlx::query(&sql)
            .bind(task_id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn last_task_run(&self, task_id: TaskId) -> Result<Option<TaskRun>, RepoError> {
        let row = sqlx::query(
            "SELECT task_id, project_id, user_id, user_ip, external_uid, info, \
             COALESCE(finish_time, created) AS finish_time \
             FROM task_run WHERE task_id = $1 ORDER BY finish_time DESC NULLS LAST LIMIT 1",
        )
        .bind(task_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_run_from_row).transpose()
    }

    async fn count_task_runs_matching(
        &self,
        project_id: ProjectId,
        identity: &Identity,
    ) -> Result<i64, RepoError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM task_run WHERE project_id = $1 AND {} = $2",
            identity_column(identity)
        );
        let q = sqlx::query(&sql).bind(project_id.get());
        let row = bind_identity(q, identity).fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }

    async fn count_tasks(&self, project_id: ProjectId) -> Result<i64, RepoError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM task WHERE project_id = $1")
            .bind(project_id.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl ProjectRepository for PgTaskStore {
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>, RepoError> {
        let row = sqlx::query(
            "SELECT id, short_name, allow_anonymous_contributors, info, secret_key \
             FROM project WHERE id = $1",
        )
        .bind(project_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn get_by_short_name(&self, short_name: &str) -> Result<Option<Project>, RepoError> {
        let row = sqlx::query(
            "SELECT id, short_name, allow_anonymous_contributors, info, secret_key \
             FROM project WHERE short_name = $1",
        )
        .bind(short_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(project_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[test]
    fn order_clause_always_ends_with_id() {
        let clause = order_clause(TaskOrder::desc(OrderField::Priority));
        assert_eq!(clause, "task.priority_0 DESC, task.id ASC");
    }

    #[test]
    fn exclusion_uses_the_identity_channel() {
        let clause = not_attempted_clause(&Identity::External("u".into()));
        assert!(clause.contains("tr.external_uid = $2"));
        let clause = not_attempted_clause(&Identity::Anonymous("1.1.1.1".into()));
        assert!(clause.contains("tr.user_ip = $2"));
    }

    #[rstest]
    #[case::naive_iso("2024-06-01T09:00:00.250000", Some((9, 0, 0, 250)))]
    #[case::rfc3339("2024-06-01T09:00:00+00:00", Some((9, 0, 0, 0)))]
    #[case::offset("2024-06-01T11:00:00+02:00", Some((9, 0, 0, 0)))]
    #[case::garbage("yesterday", None)]
    fn stored_timestamps_parse_as_utc(
        #[case] raw: &str,
        #[case] expected: Option<(u32, u32, u32, u32)>,
    ) {
        let expected = expected.map(|(h, m, s, ms)| {
            Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap() + chrono::Duration::milliseconds(ms.into())
        });
        assert_eq!(parse_timestamp(raw), expected);
    }

    async fn store() -> Option<PgTaskStore> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping test");
            return None;
        };
        let store = PgTaskStore::connect(&url).await.unwrap();
        store.run_migrations().await.unwrap();
        Some(store)
    }

    /// Needs a scratch PostgreSQL database in `DATABASE_URL`.
    #[ignore]
    #[tokio::test]
    async fn integer_columns_decode_into_domain_ids() {
        let Some(store) = store().await else { return };
        let short_name = format!("sched-{}", rand::random::<u32>());

        let project_id: i32 = sqlx::query_scalar(
            "INSERT INTO project (short_name, allow_anonymous_contributors, info) \
             VALUES ($1, FALSE, '{\"sched\": \"locked_scheduler\"}') RETURNING id",
        )
        .bind(short_name.as_str())
        .fetch_one(&store.pool)
        .await
        .unwrap();

        let mut task_ids = Vec::new();
        for (priority, favs) in [(0.2_f64, vec![3_i32]), (0.8, vec![3, 4])] {
            let id: i32 = sqlx::query_scalar(
                "INSERT INTO task (created, project_id, priority_0, n_answers, info, fav_user_ids) \
                 VALUES ('2024-06-01T09:00:00.000000', $1, $2, 2, '{\"q\": 1}', $3) RETURNING id",
            )
            .bind(project_id)
            .bind(priority)
            .bind(favs)
            .fetch_one(&store.pool)
            .await
            .unwrap();
            task_ids.push(id);
        }
        sqlx::query(
            "INSERT INTO task_run (project_id, task_id, user_id, finish_time, info) \
             VALUES ($1, $2, 9, '2024-06-01T10:00:00.000000', '{\"a\": \"yes\"}')",
        )
        .bind(project_id)
        .bind(task_ids[1])
        .execute(&store.pool)
        .await
        .unwrap();

        let pid = ProjectId::new(i64::from(project_id));
        let project = store.get_by_short_name(&short_name).await.unwrap().unwrap();
        assert_eq!(project.id, pid);
        assert!(!project.allow_anonymous_contributors);
        assert_eq!(project.scheduler_name(), Some("locked_scheduler"));

        let top = TaskId::new(i64::from(task_ids[1]));
        let task = store.get_task(top).await.unwrap().unwrap();
        assert_eq!(task.project_id, pid);
        assert_eq!(task.n_answers, 2);
        assert_eq!(task.fav_user_ids, vec![UserId::new(3), UserId::new(4)]);
        assert_eq!(task.created, Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());

        let rows = store
            .locked_candidates(pid, &Identity::Registered(UserId::new(1)), 10)
            .await
            .unwrap();
        assert_eq!(rows[0].task_id, top);
        assert_eq!(rows[0].task_runs, 1);
        assert_eq!(rows[0].remaining(), 1);

        let query = CandidateQuery::new(pid, Identity::Registered(UserId::new(9)))
            .order(TaskOrder::by_id())
            .page(10, 0);
        let open: Vec<_> = store.candidates(&query).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(open, vec![TaskId::new(i64::from(task_ids[0]))]);

        let last = store.last_task_run(top).await.unwrap().unwrap();
        assert_eq!(last.identity, Identity::Registered(UserId::new(9)));
        assert_eq!(last.info["a"], "yes");
        assert_eq!(store.count_tasks(pid).await.unwrap(), 2);
        assert_eq!(
            store
                .count_task_runs_matching(pid, &Identity::Registered(UserId::new(9)))
                .await
                .unwrap(),
            1
        );
    }
}
