use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Graduated response to process/system memory pressure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    Warn,
    Pause,
    Reject,
    Emergency,
}

impl PressureLevel {
    fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Warn => 1,
            Self::Pause => 2,
            Self::Reject => 3,
            Self::Emergency => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::Warn,
            2 => Self::Pause,
            3 => Self::Reject,
            _ => Self::Emergency,
        }
    }
}

/// Thresholds driving level classification. `rss_budget_bytes` is the
/// process's configured memory budget; `emergency_free_floor_bytes` is the
/// system-wide free-memory floor below which the process force-aborts
/// non-essential work.
#[derive(Clone, Copy, Debug)]
pub struct WatchdogConfig {
    pub rss_budget_bytes: u64,
    pub emergency_free_floor_bytes: u64,
    pub low_free_floor_bytes: u64,
    pub sample_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            rss_budget_bytes: 2 * 1024 * 1024 * 1024,
            emergency_free_floor_bytes: 128 * 1024 * 1024,
            low_free_floor_bytes: 512 * 1024 * 1024,
            sample_interval: Duration::from_secs(5),
        }
    }
}

fn classify(rss: u64, free: u64, config: &WatchdogConfig) -> PressureLevel {
    if free < config.emergency_free_floor_bytes {
        return PressureLevel::Emergency;
    }
    let ratio = rss as f64 / config.rss_budget_bytes.max(1) as f64;
    if ratio >= 0.90 {
        return PressureLevel::Reject;
    }
    if free < config.low_free_floor_bytes {
        return PressureLevel::Pause;
    }
    if ratio >= 0.70 {
        return PressureLevel::Warn;
    }
    PressureLevel::Normal
}

/// Periodically samples process RSS and system free memory, invoking a
/// callback exactly once per level transition (same discipline as the
/// worker pool's backpressure toggle).
pub struct MemoryWatchdog {
    level: Arc<AtomicU8>,
    stopped: AtomicBool,
    token: CancellationToken,
    _task: tokio::task::JoinHandle<()>,
}

impl MemoryWatchdog {
    pub fn start(config: WatchdogConfig, on_change: impl Fn(PressureLevel) + Send + Sync + 'static) -> Arc<Self> {
        let level = Arc::new(AtomicU8::new(PressureLevel::Normal.as_u8()));
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_level = level.clone();

        let pid = Pid::from_u32(std::process::id());
        let task = tokio::spawn(async move {
            let token = task_token;
            let level = task_level;
            let mut system = System::new_all();
            let mut interval = tokio::time::interval(config.sample_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        system.refresh_memory();
                        system.refresh_process(pid);
                        let rss = system.process(pid).map(|p| p.memory()).unwrap_or(0);
                        let free = system.available_memory();
                        let next = classify(rss, free, &config);

                        let previous = PressureLevel::from_u8(level.swap(next.as_u8(), Ordering::SeqCst));
                        if previous != next {
                            match next {
                                PressureLevel::Warn => warn!(rss, free, "memory pressure: warn"),
                                PressureLevel::Emergency => warn!(rss, free, "memory pressure: emergency"),
                                _ => info!(rss, free, ?next, "memory pressure level changed"),
                            }
                            on_change(next);
                        }
                    }
                }
            }
        });

        Arc::new(Self { level, stopped: AtomicBool::new(false), token, _task: task })
    }

    pub fn level(&self) -> PressureLevel {
        PressureLevel::from_u8(self.level.load(Ordering::SeqCst))
    }

    /// Idempotent: a second `stop()` is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_normal_below_all_thresholds() {
        let config = WatchdogConfig::default();
        assert_eq!(classify(100, u64::MAX, &config), PressureLevel::Normal);
    }

    #[test]
    fn classify_warn_between_70_and_89_percent() {
        let config = WatchdogConfig::default();
        let rss = (config.rss_budget_bytes as f64 * 0.75) as u64;
        assert_eq!(classify(rss, u64::MAX, &config), PressureLevel::Warn);
    }

    #[test]
    fn classify_reject_at_90_percent_or_above() {
        let config = WatchdogConfig::default();
        let rss = (config.rss_budget_bytes as f64 * 0.95) as u64;
        assert_eq!(classify(rss, u64::MAX, &config), PressureLevel::Reject);
    }

    #[test]
    fn classify_emergency_when_free_memory_below_floor_overrides_everything() {
        let config = WatchdogConfig::default();
        assert_eq!(classify(1, config.emergency_free_floor_bytes - 1, &config), PressureLevel::Emergency);
    }

    #[test]
    fn classify_pause_on_low_free_memory_without_high_rss() {
        let config = WatchdogConfig::default();
        assert_eq!(classify(1, config.low_free_floor_bytes - 1, &config), PressureLevel::Pause);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let watchdog = MemoryWatchdog::start(WatchdogConfig { sample_interval: Duration::from_millis(10), ..Default::default() }, |_| {});
        watchdog.stop();
        watchdog.stop();
    }
}
