use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::error::JournalError;

const BACKUP_PREFIX: &str = "pre-migration-";
const BACKUP_SUFFIX: &str = ".sqlite3";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Retention bucket boundaries for pre-migration backups (an Open Question
/// in spec.md §9, resolved here — see DESIGN.md). This governs only the
/// backup-before-migration copy this module makes; the full on-disk
/// encrypted backup tool named in spec.md §1 is a separate, out-of-scope
/// subsystem with its own retention policy.
const DAILY_KEEP: i64 = 7;
const WEEKLY_KEEP: usize = 4;
const MONTHLY_KEEP: usize = 3;
const WEEKLY_WINDOW_DAYS: i64 = DAILY_KEEP + 7 * WEEKLY_KEEP as i64;
const MONTHLY_WINDOW_DAYS: i64 = WEEKLY_WINDOW_DAYS + 90;

/// Connection + pool configuration for the local SQLite store.
///
/// One file on disk, single-user, no remote replicas — the PRAGMA settings
/// below favor durability-with-concurrency over raw throughput: WAL lets the
/// worker pool's readers and the writer coexist without blocking each other.
#[derive(Clone, Debug)]
pub struct SqliteStoreConfig {
    pub path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

impl From<&SqliteStoreConfig> for SqliteConnectOptions {
    fn from(config: &SqliteStoreConfig) -> Self {
        SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
    }
}

pub async fn create_sqlite_pool(config: &SqliteStoreConfig) -> Result<Pool<Sqlite>, JournalError> {
    info!(path = %config.path, "opening sqlite store");
    let options = SqliteConnectOptions::from(config).disable_statement_logging();
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(JournalError::from)
}

/// Apply pending migrations, backing up the database file first when
/// `backup_dir` is configured.
///
/// A migration failure here is fatal at startup (exit code 2 per the CLI's
/// lifecycle contract) — callers should not attempt to continue serving
/// against a partially migrated schema.
pub async fn run_migrations(pool: &Pool<Sqlite>, config: &SqliteStoreConfig, backup_dir: Option<&str>) -> Result<(), JournalError> {
    if let Some(dir) = backup_dir {
        if std::path::Path::new(&config.path).exists() {
            std::fs::create_dir_all(dir).map_err(|e| JournalError::Transaction(e.to_string()))?;
            let now = Utc::now();
            let stamp = now.format(BACKUP_TIMESTAMP_FORMAT);
            let dest = format!("{dir}/{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}");
            std::fs::copy(&config.path, &dest).map_err(|e| JournalError::Transaction(e.to_string()))?;
            info!(backup = %dest, "backed up database before migration");
            prune_backups(dir, now);
        }
    }

    info!("applying migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Parses the timestamp out of a `pre-migration-<stamp>.sqlite3` filename.
/// Returns `None` for anything that doesn't match, so a stray file in the
/// backup directory is left alone rather than treated as prunable.
fn parse_backup_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
    let naive = NaiveDateTime::parse_from_str(stamp, BACKUP_TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Applies the daily/weekly/monthly retention buckets to the set of
/// `(file_name, taken_at)` backups, returning the file names to delete
/// (oldest-first is not guaranteed; callers only care about set membership).
///
/// Bucket boundaries, relative to `now`:
/// - age < 7 days: one kept per calendar day (up to 7).
/// - 7 <= age < 7 + 4*7 days: one kept per ISO week (up to 4).
/// - 7+28 <= age < 7+28+90 days: one kept per calendar month (up to 3).
/// - older than that: pruned unconditionally.
///
/// Within each bucket the most recent backup for a given day/week/month is
/// kept; a day/week/month must have its slot filled before an older one
/// in the same bucket gets a chance, since `backups` is walked newest-first.
fn backups_to_prune(mut backups: Vec<(String, DateTime<Utc>)>, now: DateTime<Utc>) -> Vec<String> {
    backups.sort_by(|a, b| b.1.cmp(&a.1));

    let mut keep: HashSet<String> = HashSet::new();
    let mut seen_days: HashSet<chrono::NaiveDate> = HashSet::new();
    let mut seen_weeks: HashSet<(i32, u32)> = HashSet::new();
    let mut seen_months: HashSet<(i32, u32)> = HashSet::new();

    for (file_name, taken_at) in &backups {
        let age_days = (now - *taken_at).num_days();
        let date = taken_at.date_naive();

        if age_days < DAILY_KEEP {
            if seen_days.insert(date) {
                keep.insert(file_name.clone());
            }
        } else if age_days < WEEKLY_WINDOW_DAYS {
            let week = date.iso_week();
            if seen_weeks.len() < WEEKLY_KEEP && seen_weeks.insert((week.year(), week.week())) {
                keep.insert(file_name.clone());
            }
        } else if age_days < MONTHLY_WINDOW_DAYS {
            if seen_months.len() < MONTHLY_KEEP && seen_months.insert((date.year(), date.month())) {
                keep.insert(file_name.clone());
            }
        }
    }

    backups.into_iter().filter(|(name, _)| !keep.contains(name)).map(|(name, _)| name).collect()
}

/// Lists `dir` for `pre-migration-*.sqlite3` backups and deletes whatever
/// falls outside the retention buckets. Best-effort: a read or delete
/// failure is logged and does not fail the migration that triggered it.
fn prune_backups(dir: &str, now: DateTime<Utc>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(%error, dir, "could not list backup directory for pruning");
            return;
        }
    };

    let backups: Vec<(String, DateTime<Utc>)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_str()?.to_string();
            let taken_at = parse_backup_timestamp(&file_name)?;
            Some((file_name, taken_at))
        })
        .collect();

    for file_name in backups_to_prune(backups, now) {
        let path = format!("{dir}/{file_name}");
        if let Err(error) = std::fs::remove_file(&path) {
            warn!(%error, path, "failed to prune expired backup");
        } else {
            info!(path, "pruned backup past its retention bucket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_enable_wal_and_busy_timeout() {
        let config = SqliteStoreConfig::new(":memory:");
        let _options = SqliteConnectOptions::from(&config);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    fn backup_name(at: DateTime<Utc>) -> String {
        format!("{BACKUP_PREFIX}{}{BACKUP_SUFFIX}", at.format(BACKUP_TIMESTAMP_FORMAT))
    }

    #[test]
    fn parse_backup_timestamp_round_trips_a_well_formed_name() {
        let now = Utc::now();
        let name = backup_name(now);
        let parsed = parse_backup_timestamp(&name).unwrap();
        assert_eq!(parsed.format(BACKUP_TIMESTAMP_FORMAT).to_string(), now.format(BACKUP_TIMESTAMP_FORMAT).to_string());
    }

    #[test]
    fn parse_backup_timestamp_ignores_unrelated_files() {
        assert!(parse_backup_timestamp("schema.sqlite3").is_none());
        assert!(parse_backup_timestamp("pre-migration-not-a-timestamp.sqlite3").is_none());
    }

    #[test]
    fn backups_within_daily_window_are_all_kept() {
        let now = Utc::now();
        let backups: Vec<_> = (0..7)
            .map(|d| {
                let ts = now - chrono::Duration::days(d);
                (backup_name(ts), ts)
            })
            .collect();
        assert!(backups_to_prune(backups, now).is_empty());
    }

    #[test]
    fn only_the_newest_same_day_backup_within_the_daily_window_is_kept() {
        let now = Utc::now();
        let morning = now - chrono::Duration::hours(10);
        let evening = now - chrono::Duration::hours(1);
        let backups = vec![(backup_name(morning), morning), (backup_name(evening), evening)];
        let pruned = backups_to_prune(backups, now);
        assert_eq!(pruned, vec![backup_name(morning)]);
    }

    #[test]
    fn weekly_bucket_keeps_at_most_four_distinct_weeks() {
        let now = Utc::now();
        // 6 backups, one every 7 days, all past the daily window (>= 7 days old).
        let backups: Vec<_> = (1..=6)
            .map(|w| {
                let ts = now - chrono::Duration::days(7 + 7 * w);
                (backup_name(ts), ts)
            })
            .collect();
        let pruned = backups_to_prune(backups.clone(), now);
        let kept = backups.len() - pruned.len();
        assert_eq!(kept, WEEKLY_KEEP);
    }

    #[test]
    fn monthly_bucket_keeps_at_most_three_distinct_months() {
        let now = Utc::now();
        let backups: Vec<_> = (1..=6)
            .map(|m| {
                let ts = now - chrono::Duration::days(WEEKLY_WINDOW_DAYS + 30 * m);
                (backup_name(ts), ts)
            })
            .collect();
        let pruned = backups_to_prune(backups.clone(), now);
        let kept = backups.len() - pruned.len();
        assert_eq!(kept, MONTHLY_KEEP);
    }

    #[test]
    fn backups_older_than_every_bucket_are_pruned() {
        let now = Utc::now();
        let ancient = now - chrono::Duration::days(MONTHLY_WINDOW_DAYS + 365);
        let backups = vec![(backup_name(ancient), ancient)];
        assert_eq!(backups_to_prune(backups, now), vec![backup_name(ancient)]);
    }
}
