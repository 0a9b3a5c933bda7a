use std::collections::HashMap;

use sentinel_types::{ExecutionLogEntry, ExecutionLogStatus, IdempotencyKey, JsonValue};

/// Batch-built cache of completed results, keyed by `IdempotencyKey`.
///
/// Backs `POST /jobs/{id}/replay`: re-executing a job should adopt every
/// already-completed step's result rather than re-running it. Construction
/// is a single O(n) scan over the job's execution-log rows.
#[derive(Clone, Debug, Default)]
pub struct ReplayCache {
    results: HashMap<IdempotencyKey, JsonValue>,
}

impl ReplayCache {
    pub fn build(entries: &[ExecutionLogEntry]) -> Self {
        let results = entries
            .iter()
            .filter(|entry| entry.status == ExecutionLogStatus::Completed)
            .filter_map(|entry| entry.result.clone().map(|result| (entry.key.clone(), result)))
            .collect();
        Self { results }
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<&JsonValue> {
        self.results.get(key)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn completed(job: &str, step: &str, result: JsonValue) -> ExecutionLogEntry {
        let mut entry = ExecutionLogEntry::started(IdempotencyKey::new(job, step), Utc::now());
        entry.complete(result, Utc::now());
        entry
    }

    fn started(job: &str, step: &str) -> ExecutionLogEntry {
        ExecutionLogEntry::started(IdempotencyKey::new(job, step), Utc::now())
    }

    #[test]
    fn build_only_caches_completed_entries() {
        let entries = vec![
            completed("job-1", "step-a", JsonValue::Bool(true)),
            started("job-1", "step-b"),
        ];
        let cache = ReplayCache::build(&entries);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&IdempotencyKey::new("job-1", "step-a")), Some(&JsonValue::Bool(true)));
        assert_eq!(cache.get(&IdempotencyKey::new("job-1", "step-b")), None);
    }

    #[test]
    fn empty_entries_yield_empty_cache() {
        let cache = ReplayCache::build(&[]);
        assert!(cache.is_empty());
    }
}
