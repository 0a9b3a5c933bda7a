use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// `maxWorkers`, `pollInterval`, `backpressureThreshold` for the pool.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub backpressure_threshold: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 4, poll_interval: Duration::from_millis(250), backpressure_threshold: 4 }
    }
}

/// One iteration of a worker's `claim -> run -> release` loop. Returns
/// `true` if a job was claimed and processed, `false` on a claim miss (the
/// caller backs off for `poll_interval`).
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_one(&self, worker_id: &str, cancel: CancellationToken) -> Result<bool, sentinel_types::SentinelError>;
}

/// Bounded set of cooperative worker tasks, each looping `claim -> run
/// orchestrator -> release`. Backpressure pauses polling (not busy-waiting)
/// once `active >= backpressure_threshold`; the transition logs exactly
/// once per toggle via a compare-exchange, the same discipline the
/// memory watchdog uses for its level transitions.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    runner: Arc<dyn JobRunner>,
    active_workers: Arc<AtomicUsize>,
    backpressure_active: Arc<std::sync::atomic::AtomicBool>,
    handles: Mutex<HashMap<String, (CancellationToken, tokio::task::JoinHandle<()>)>>,
    stop_token: CancellationToken,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, runner: Arc<dyn JobRunner>) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            runner,
            active_workers: Arc::new(AtomicUsize::new(0)),
            backpressure_active: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            handles: Mutex::new(HashMap::new()),
            stop_token: CancellationToken::new(),
        });

        let started = pool.clone();
        tokio::spawn(async move { started.spawn_workers().await });

        pool
    }

    async fn spawn_workers(self: Arc<Self>) {
        let mut handles = self.handles.lock().await;
        for i in 0..self.config.max_workers {
            let worker_id = format!("worker-{i}");
            let token = CancellationToken::new();
            let pool = self.clone();
            let worker_token = token.clone();
            let id_for_task = worker_id.clone();
            let handle = tokio::spawn(async move { pool.worker_loop(id_for_task, worker_token).await });
            handles.insert(worker_id, (token, handle));
        }
    }

    async fn worker_loop(&self, worker_id: String, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() || self.stop_token.is_cancelled() {
                return;
            }

            if self.is_backpressure_active() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.poll_interval) => continue,
                }
            }

            self.active_workers.fetch_add(1, Ordering::SeqCst);
            self.refresh_backpressure();

            let ran = tokio::select! {
                _ = cancel.cancelled() => {
                    self.active_workers.fetch_sub(1, Ordering::SeqCst);
                    self.refresh_backpressure();
                    return;
                }
                result = self.runner.run_one(&worker_id, cancel.clone()) => result,
            };

            self.active_workers.fetch_sub(1, Ordering::SeqCst);
            self.refresh_backpressure();

            match ran {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(error) => {
                    tracing::warn!(worker_id, %error, "worker iteration failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }

    fn refresh_backpressure(&self) {
        let active = self.active_workers.load(Ordering::SeqCst);
        let should_pause = active >= self.config.backpressure_threshold;
        let was_paused = self.backpressure_active.swap(should_pause, Ordering::SeqCst);
        if was_paused != should_pause {
            if should_pause {
                info!(active, threshold = self.config.backpressure_threshold, "worker pool backpressure engaged");
            } else {
                info!(active, "worker pool backpressure released");
            }
        }
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure_active.load(Ordering::SeqCst)
    }

    pub fn active_worker_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Ceases polling, signals every active worker's cancel handle, races
    /// their completions against `grace`, and returns the worker-ids still
    /// running when the grace period elapsed. Idempotent.
    pub async fn stop(&self, grace: Duration) -> Vec<String> {
        if self.stop_token.is_cancelled() {
            return Vec::new();
        }
        self.stop_token.cancel();

        let mut handles = self.handles.lock().await;
        for (token, _) in handles.values() {
            token.cancel();
        }

        let mut still_running = Vec::new();
        let deadline = tokio::time::Instant::now() + grace;
        for (worker_id, (_, handle)) in handles.iter_mut() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(_) => {}
                Err(_) => {
                    handle.abort();
                    still_running.push(worker_id.clone());
                }
            }
        }
        debug!(still_running = still_running.len(), "worker pool stop complete");
        still_running
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    struct CountingRunner {
        calls: Arc<AtomicU32>,
        claims_available: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl JobRunner for CountingRunner {
        async fn run_one(&self, _worker_id: &str, _cancel: CancellationToken) -> Result<bool, sentinel_types::SentinelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.claims_available.load(Ordering::SeqCst) > 0 {
                self.claims_available.fetch_sub(1, Ordering::SeqCst);
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    #[tokio::test]
    async fn pool_processes_available_jobs_and_backs_off_on_empty_queue() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = Arc::new(CountingRunner { calls: calls.clone(), claims_available: Arc::new(AtomicU32::new(5)) });
        let pool = WorkerPool::new(
            WorkerPoolConfig { max_workers: 1, poll_interval: Duration::from_millis(5), backpressure_threshold: 10 },
            runner,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(calls.load(Ordering::SeqCst) >= 5);

        pool.stop(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let runner = Arc::new(CountingRunner { calls: Arc::new(AtomicU32::new(0)), claims_available: Arc::new(AtomicU32::new(0)) });
        let pool = WorkerPool::new(WorkerPoolConfig { max_workers: 1, poll_interval: Duration::from_millis(5), backpressure_threshold: 10 }, runner);

        let first = pool.stop(Duration::from_millis(50)).await;
        let second = pool.stop(Duration::from_millis(50)).await;
        assert!(first.is_empty());
        assert!(second.is_empty());
    }
}
