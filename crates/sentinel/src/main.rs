mod adapter;
mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sentinel_journal::{create_sqlite_pool, run_migrations, SqliteAuditSink, SqliteIdempotencyLog};
use sentinel_runtime::{
    ApprovalRegistry, ComponentRegistry, JobOrchestrator, JobQueue, JobRunner, MemoryWatchdog,
    MessageRouter, Planner, Validator, WorkerPool,
};
use sentinel_types::{ErrorKind, Job, JobStatus, JsonValue, SentinelError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapter::UnconfiguredLlmAdapter;
use crate::config::AppConfig;

/// Dual-LLM job orchestration daemon.
#[derive(Debug, Parser)]
#[command(name = "sentinel", version, about = "Dual-LLM job orchestration daemon")]
struct Cli {
    /// Path to a TOML config file. Defaults to `./sentinel.toml` if present.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the worker pool against the job queue (default).
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Verify the database is reachable and exit.
    HealthCheck,
    /// Reload configuration in a running `serve` process.
    ///
    /// Out of scope: this process is stateless per invocation, so there is
    /// no running daemon to signal here. A deployed gateway would send this
    /// over its own control channel; this subcommand documents the seam and
    /// always succeeds.
    ReloadConfig,
}

fn init_tracing(config: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load configuration: {error}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&app_config.logging);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ExitCode::from(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => runtime.block_on(serve(app_config)),
        Command::Migrate => runtime.block_on(migrate(app_config)),
        Command::HealthCheck => runtime.block_on(health_check(app_config)),
        Command::ReloadConfig => reload_config(),
    }
}

async fn open_store(app_config: &AppConfig) -> Result<sqlx::Pool<sqlx::Sqlite>, ExitCode> {
    let store_config: sentinel_journal::SqliteStoreConfig = (&app_config.store).into();
    create_sqlite_pool(&store_config).await.map_err(|error| {
        error!(%error, "failed to open sqlite store");
        ExitCode::from(1)
    })
}

async fn migrate(app_config: AppConfig) -> ExitCode {
    let pool = match open_store(&app_config).await {
        Ok(pool) => pool,
        Err(code) => return code,
    };
    let store_config: sentinel_journal::SqliteStoreConfig = (&app_config.store).into();

    match run_migrations(&pool, &store_config, app_config.store.backup_dir.as_deref()).await {
        Ok(()) => {
            info!("migrations applied");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "migration failed");
            ExitCode::from(2)
        }
    }
}

/// The `GET /health`-equivalent report: overall status, per-component
/// status, queue depth, and version, per §6.6. No "active sessions" count
/// exists outside a running `serve` process — this CLI invocation opens its
/// own short-lived connection, so that field is omitted rather than faked.
#[derive(serde::Serialize)]
struct HealthReport {
    status: &'static str,
    version: &'static str,
    components: Vec<ComponentHealth>,
}

#[derive(serde::Serialize)]
struct ComponentHealth {
    name: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_depth: Option<i64>,
}

async fn health_check(app_config: AppConfig) -> ExitCode {
    let pool = match open_store(&app_config).await {
        Ok(pool) => pool,
        Err(code) => return code,
    };

    let store_ok = sqlx::query("SELECT 1").execute(&pool).await.is_ok();
    let queue = JobQueue::new(pool);
    let pending_depth = queue.count_by_status(JobStatus::Pending).await.ok();

    let report = HealthReport {
        status: if store_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        components: vec![
            ComponentHealth { name: "store", status: if store_ok { "ok" } else { "unreachable" }, queue_depth: None },
            ComponentHealth {
                name: "queue",
                status: if pending_depth.is_some() { "ok" } else { "unreachable" },
                queue_depth: pending_depth,
            },
        ],
    };

    match serde_json::to_string(&report) {
        Ok(json) => println!("{json}"),
        Err(error) => error!(%error, "failed to serialize health report"),
    }

    if store_ok {
        info!("health check ok");
        ExitCode::SUCCESS
    } else {
        error!("health check failed: store unreachable");
        ExitCode::from(1)
    }
}

fn reload_config() -> ExitCode {
    info!("reload-config is a documented no-op outside a running gateway-managed process");
    ExitCode::SUCCESS
}

struct SentinelJobRunner {
    queue: Arc<JobQueue>,
    orchestrator: Arc<JobOrchestrator>,
}

#[async_trait::async_trait]
impl JobRunner for SentinelJobRunner {
    async fn run_one(&self, worker_id: &str, cancel: CancellationToken) -> Result<bool, SentinelError> {
        let Some(job) = self.queue.claim(worker_id).await? else {
            return Ok(false);
        };

        let system_prompt = metadata_str(&job, "systemPrompt").unwrap_or_default();
        let user_message = metadata_str(&job, "userMessage").unwrap_or_default();
        let job_id = job.id;

        let finished = self.orchestrator.run(job, &system_prompt, &user_message, cancel).await;
        let retriable = finished.status == JobStatus::Failed
            && finished.error.as_ref().map(is_retriable_error).unwrap_or(false);

        if let Err(error) = self.queue.complete(&finished, retriable).await {
            warn!(%job_id, %error, "failed to persist job outcome");
        }
        Ok(true)
    }
}

fn metadata_str(job: &Job, key: &str) -> Option<String> {
    job.metadata.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

fn is_retriable_error(error: &JsonValue) -> bool {
    error
        .as_object()
        .and_then(|obj| obj.get("kind"))
        .and_then(JsonValue::as_str)
        .map(|kind| matches!(kind, "timeout" | "provider" | "sandbox"))
        .unwrap_or(false)
}

async fn serve(app_config: AppConfig) -> ExitCode {
    let pool = match open_store(&app_config).await {
        Ok(pool) => pool,
        Err(code) => return code,
    };
    let store_config: sentinel_journal::SqliteStoreConfig = (&app_config.store).into();

    if let Err(error) = run_migrations(&pool, &store_config, app_config.store.backup_dir.as_deref()).await {
        error!(%error, "migration failed at startup");
        return ExitCode::from(2);
    }

    if app_config.validator.deny_same_provider && app_config.planner.model == app_config.validator.model {
        error!(
            model = %app_config.planner.model,
            "planner and validator configured with the same model identity and deny_same_provider is set"
        );
        return ExitCode::from(1);
    }

    let registry = ComponentRegistry::new();
    let audit_sink: Arc<dyn sentinel_types::AuditSink> = Arc::new(SqliteAuditSink::new(pool.clone()));
    let router = Arc::new(MessageRouter::new(registry, audit_sink));

    let idempotency = Arc::new(SqliteIdempotencyLog::new(pool.clone()));
    let approvals = Arc::new(ApprovalRegistry::new());
    let budget_config = (&app_config.budget).into();

    let planner = Arc::new(Planner::new(Arc::new(UnconfiguredLlmAdapter::planner()), app_config.planner.model.clone()));
    let validator = Arc::new(Validator::new(
        Arc::new(UnconfiguredLlmAdapter::validator()),
        app_config.validator.model.clone(),
        app_config.planner.model.clone(),
    ));

    let orchestrator = Arc::new(JobOrchestrator::new(planner, validator, router, idempotency, approvals, budget_config));
    let queue = Arc::new(JobQueue::new(pool));

    let watchdog = MemoryWatchdog::start((&app_config.watchdog).into(), |level| {
        info!(?level, "memory pressure level changed");
    });

    let runner = Arc::new(SentinelJobRunner { queue, orchestrator });
    let pool_config = (&app_config.worker_pool).into();
    let worker_pool = WorkerPool::new(pool_config, runner);

    info!(workers = app_config.worker_pool.max_workers, "sentinel serving");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(error) => error!(%error, "failed to listen for shutdown signal"),
    }

    let still_running = worker_pool.stop(Duration::from_secs(10)).await;
    if !still_running.is_empty() {
        warn!(count = still_running.len(), "workers force-aborted past the shutdown grace period");
    }
    watchdog.stop();

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::JobSource;

    #[test]
    fn metadata_str_reads_a_present_string_field() {
        let mut job = Job::new(JobSource::User, 0, 1);
        job.metadata.insert("systemPrompt".to_string(), JsonValue::String("hi".into()));
        assert_eq!(metadata_str(&job, "systemPrompt"), Some("hi".to_string()));
    }

    #[test]
    fn metadata_str_is_none_when_absent() {
        let job = Job::new(JobSource::User, 0, 1);
        assert_eq!(metadata_str(&job, "systemPrompt"), None);
    }

    #[test]
    fn is_retriable_error_checks_the_structured_kind_field() {
        let timeout = serde_json::to_value(SentinelError::timeout("slow")).unwrap();
        assert!(is_retriable_error(&JsonValue::from(timeout)));

        let validation = serde_json::to_value(SentinelError::validation("bad")).unwrap();
        assert!(!is_retriable_error(&JsonValue::from(validation)));
    }

    #[allow(dead_code)]
    fn assert_error_kind_variants_exhaustive(kind: ErrorKind) {
        match kind {
            ErrorKind::Validation
            | ErrorKind::NotFound
            | ErrorKind::Conflict
            | ErrorKind::Timeout
            | ErrorKind::Provider
            | ErrorKind::Sandbox
            | ErrorKind::Auth
            | ErrorKind::Cancelled
            | ErrorKind::Internal => {}
        }
    }
}
