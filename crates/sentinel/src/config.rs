use std::time::Duration;

use serde::Deserialize;

/// Layered configuration for the `sentinel` binary: built-in defaults, an
/// optional TOML file, then `SENTINEL__*` environment overrides (double
/// underscore separates nesting, e.g. `SENTINEL__WORKER_POOL__MAX_WORKERS`).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub worker_pool: WorkerPoolConfig,
    pub budget: BudgetConfig,
    pub watchdog: WatchdogConfig,
    pub planner: ModelConfig,
    pub validator: ValidatorConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            worker_pool: WorkerPoolConfig::default(),
            budget: BudgetConfig::default(),
            watchdog: WatchdogConfig::default(),
            planner: ModelConfig::default(),
            validator: ValidatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub backup_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "sentinel.sqlite3".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            backup_dir: None,
        }
    }
}

impl From<&StoreConfig> for sentinel_journal::SqliteStoreConfig {
    fn from(config: &StoreConfig) -> Self {
        let mut store = sentinel_journal::SqliteStoreConfig::new(config.path.clone());
        store.max_connections = config.max_connections;
        store.busy_timeout_ms = config.busy_timeout_ms;
        store
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub backpressure_threshold: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let defaults = sentinel_runtime::WorkerPoolConfig::default();
        Self {
            max_workers: defaults.max_workers,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            backpressure_threshold: defaults.backpressure_threshold,
        }
    }
}

impl From<&WorkerPoolConfig> for sentinel_runtime::WorkerPoolConfig {
    fn from(config: &WorkerPoolConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            backpressure_threshold: config.backpressure_threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub job_total_secs: u64,
    pub planning_secs: u64,
    pub validation_secs: u64,
    pub per_step_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let defaults = sentinel_runtime::JobBudgetConfig::default();
        Self {
            job_total_secs: defaults.job_total.as_secs(),
            planning_secs: defaults.planning.as_secs(),
            validation_secs: defaults.validation.as_secs(),
            per_step_secs: defaults.per_step.as_secs(),
        }
    }
}

impl From<&BudgetConfig> for sentinel_runtime::JobBudgetConfig {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            job_total: Duration::from_secs(config.job_total_secs),
            planning: Duration::from_secs(config.planning_secs),
            validation: Duration::from_secs(config.validation_secs),
            per_step: Duration::from_secs(config.per_step_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub rss_budget_bytes: u64,
    pub emergency_free_floor_bytes: u64,
    pub low_free_floor_bytes: u64,
    pub sample_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        let defaults = sentinel_runtime::WatchdogConfig::default();
        Self {
            rss_budget_bytes: defaults.rss_budget_bytes,
            emergency_free_floor_bytes: defaults.emergency_free_floor_bytes,
            low_free_floor_bytes: defaults.low_free_floor_bytes,
            sample_interval_secs: defaults.sample_interval.as_secs(),
        }
    }
}

impl From<&WatchdogConfig> for sentinel_runtime::WatchdogConfig {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            rss_budget_bytes: config.rss_budget_bytes,
            emergency_free_floor_bytes: config.emergency_free_floor_bytes,
            low_free_floor_bytes: config.low_free_floor_bytes,
            sample_interval: Duration::from_secs(config.sample_interval_secs),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { model: "planner-default".to_string() }
    }
}

/// `deny_same_provider` gates whether a validator sharing the planner's
/// exact model identity is merely logged (the default, `false`) or treated
/// as a hard configuration error at startup.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub model: String,
    pub deny_same_provider: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { model: "validator-default".to_string(), deny_same_provider: false }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Builds the layered configuration: compiled-in defaults, then an optional
/// TOML file at `path` (or `sentinel.toml` in the working directory if
/// `path` is `None` and that file exists), then `SENTINEL__*` environment
/// overrides, applied in that order so the environment always wins.
pub fn load(path: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    } else {
        builder = builder.add_source(config::File::with_name("sentinel").required(false));
    }

    builder = builder.add_source(config::Environment::with_prefix("SENTINEL").separator("__"));

    builder.build()?.try_deserialize()
}
