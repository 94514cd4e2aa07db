use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crowdsched_core::app::{App, AppBuilder, NewTaskRequest, NewTaskResponse, Requester};
use crowdsched_core::config::{SchedConfig, load_dotenv};
use crowdsched_core::domain::{Project, ProjectId, Role, Task, TaskId, TaskRun, TaskState, UserId};
use crowdsched_core::impls::{InMemoryContributionsGuard, InMemoryLockManager, InMemoryTaskStore};
use crowdsched_core::observability::init_tracing;
use crowdsched_core::ports::{
    Clock, ContributionsGuard, LockManager, SystemClock, TaskRepository,
};
use crowdsched_core::sched::sched_variants;

#[derive(Parser)]
#[command(name = "crowdsched", about = "Task scheduler playground")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the scheduler names a project can be configured with.
    Variants,
    /// Run concurrent contributors against a seeded in-memory project.
    Simulate {
        /// Number of concurrent registered contributors.
        #[arg(long, default_value_t = 8)]
        users: i64,
        #[arg(long, default_value_t = 5)]
        tasks: i64,
        /// Answers required per task.
        #[arg(long, default_value_t = 3)]
        n_answers: i64,
        /// Scheduler name stored on the project.
        #[arg(long, default_value = "locked_scheduler")]
        policy: String,
    },
    /// Ask an existing PostgreSQL-backed project for the next task.
    #[cfg(feature = "postgres")]
    NextTask {
        #[arg(long)]
        project_id: i64,
        /// Registered user; omit to ask anonymously.
        #[arg(long)]
        user_id: Option<i64>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long, default_value_t = 1)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long)]
        orderby: Option<String>,
        #[arg(long)]
        desc: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = SchedConfig::from_env();
    config.log_summary();

    match cli.command {
        Command::Variants => {
            for (name, label) in sched_variants() {
                println!("{name:<18} {label}");
            }
        }
        Command::Simulate {
            users,
            tasks,
            n_answers,
            policy,
        } => simulate(&config, users, tasks, n_answers, &policy).await?,
        #[cfg(feature = "postgres")]
        Command::NextTask {
            project_id,
            user_id,
            ip,
            limit,
            offset,
            orderby,
            desc,
        } => {
            let requester = match user_id {
                Some(id) => Requester::registered(UserId::new(id), Role::User),
                None => Requester::anonymous(ip.as_deref()),
            };
            let req = NewTaskRequest::new(ProjectId::new(project_id))
                .limit(limit)
                .offset(offset)
                .orderby(orderby.unwrap_or_else(|| "id".into()), desc);
            next_task(&config, &req, &requester).await?
        }
    }
    Ok(())
}

/// Lease and stamp stores: Redis when the feature is on and `REDIS_URL` is set.
async fn kv_stores(
    config: &SchedConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<(Arc<dyn LockManager>, Arc<dyn ContributionsGuard>)> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        use crowdsched_core::impls::{RedisContributionsGuard, RedisLockManager, redis_store};

        let conn = redis_store::connect(url)
            .await
            .context("connecting to redis")?;
        info!("using redis lock manager");
        let locks = RedisLockManager::new(conn.clone(), clock.clone(), config.lock_ttl());
        let guard = RedisContributionsGuard::new(conn, clock, config.lock_ttl());
        return Ok((Arc::new(locks), Arc::new(guard)));
    }
    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the redis feature is off; using in-memory stores");
    }
    let locks = InMemoryLockManager::new(clock.clone(), config.lock_ttl());
    let guard = InMemoryContributionsGuard::new(clock, config.lock_ttl());
    Ok((Arc::new(locks), Arc::new(guard)))
}

async fn simulate(
    config: &SchedConfig,
    users: i64,
    n_tasks: i64,
    n_answers: i64,
    policy: &str,
) -> anyhow::Result<()> {
    if users <= 0 || n_tasks <= 0 || n_answers <= 0 {
        bail!("users, tasks and n_answers must be positive");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let project_id = ProjectId::new(1);
    let store = Arc::new(InMemoryTaskStore::new());
    store
        .insert_project(Project::new(project_id, "playground").with_scheduler(policy))
        .await;
    for id in 1..=n_tasks {
        let task = Task::new(TaskId::new(id), project_id, serde_json::json!({ "item": id }))
            .with_priority(id as f64 / n_tasks as f64)
            .with_n_answers(n_answers);
        store.insert_task(task).await;
    }

    let (locks, guard) = kv_stores(config, clock).await?;
    let app = AppBuilder::new()
        .store(store.clone())
        .locks(locks)
        .guard(guard)
        .settings(config.scheduler_settings())
        .build()?;
    info!(policy, users, tasks = n_tasks, n_answers, "simulation starting");

    let handles: Vec<_> = (1..=users)
        .map(|uid| tokio::spawn(contribute(app.clone(), store.clone(), project_id, uid)))
        .collect();

    let mut per_user = BTreeMap::new();
    for (uid, handle) in (1..=users).zip(handles) {
        per_user.insert(uid, handle.await??);
    }

    println!("answers per user:");
    for (uid, count) in &per_user {
        println!("  user {uid:<4} {count}");
    }

    println!("answers per task (required {n_answers}):");
    for id in 1..=n_tasks {
        let task_id = TaskId::new(id);
        let task = store
            .get_task(task_id)
            .await?
            .with_context(|| format!("task {id} vanished"))?;
        let answers = store.task_run_count(task_id).await;
        println!("  task {id:<4} {answers:>3}  {}", task.state.as_str());
        if answers > n_answers {
            warn!(task_id = %task_id, answers, "task was over-answered");
        }
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn next_task(
    config: &SchedConfig,
    req: &NewTaskRequest,
    requester: &Requester,
) -> anyhow::Result<()> {
    use crowdsched_core::impls::PgTaskStore;

    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    let store = Arc::new(PgTaskStore::connect(url).await?);
    let (locks, guard) = kv_stores(config, Arc::new(SystemClock)).await?;
    let app = AppBuilder::new()
        .store(store)
        .locks(locks)
        .guard(guard)
        .settings(config.scheduler_settings())
        .build()?;

    let response = app.service.new_task(req, requester).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// One contributor: ask, answer, report, repeat until nothing is left.
async fn contribute(
    app: App,
    store: Arc<InMemoryTaskStore>,
    project_id: ProjectId,
    uid: i64,
) -> anyhow::Result<usize> {
    let requester = Requester::registered(UserId::new(uid), Role::User);
    let identity = requester.identity(None);
    let mut answered = 0;

    loop {
        let response = app
            .service
            .new_task(&NewTaskRequest::new(project_id), &requester)
            .await?;
        let task = match response {
            NewTaskResponse::One(task) => task,
            NewTaskResponse::Empty => break,
            other => bail!("unexpected response: {}", serde_json::to_string(&other)?),
        };

        if !app.scheduler.can_submit(project_id, task.id, &identity).await? {
            warn!(user = uid, task_id = %task.id, "lease lost before submission");
            continue;
        }
        store
            .insert_task_run(TaskRun::new(
                &task,
                identity.clone(),
                serde_json::json!({ "user": uid }),
            ))
            .await;
        if store.task_run_count(task.id).await >= task.n_answers {
            store
                .update_task(task.id, |t| t.state = TaskState::Completed)
                .await;
        }
        app.service
            .task_submitted(project_id, task.id, &identity)
            .await?;
        answered += 1;
        tokio::task::yield_now().await;
    }
    Ok(answered)
}
