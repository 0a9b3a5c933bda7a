use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use sentinel_types::{JobId, SentinelError};
use tokio::sync::oneshot;

/// Human response to an `awaiting_approval` gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

struct Pending {
    nonce: String,
    sender: oneshot::Sender<ApprovalDecision>,
}

/// Backs the `POST /jobs/{id}/nonce` + `/approve` + `/reject` surface.
///
/// One pending gate per job at a time. `issue_nonce` hands out a fresh
/// one-time token and a receiver the orchestrator awaits; `resolve`
/// consumes the pending gate exactly once — a second `approve` with the
/// same (now-stale) nonce fails `validation`.
#[derive(Default)]
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<JobId, Pending>>,
    /// Nonces already consumed, kept so a replayed `approve`/`reject` call
    /// is reported as a stale-nonce `validation` error rather than a
    /// `not_found` once the pending gate has been removed.
    consumed: Mutex<HashMap<JobId, String>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_nonce(&self, job_id: JobId) -> (String, oneshot::Receiver<ApprovalDecision>) {
        let nonce = random_nonce();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("approval registry lock poisoned").insert(job_id, Pending { nonce: nonce.clone(), sender: tx });
        (nonce, rx)
    }

    /// Returns the nonce currently pending for `job_id`, if any. Backs a
    /// gateway's `POST /jobs/{id}/nonce` — the orchestrator already issued
    /// the nonce on entering `awaiting_approval`; this just looks it up.
    pub fn peek_nonce(&self, job_id: JobId) -> Option<String> {
        self.pending.lock().expect("approval registry lock poisoned").get(&job_id).map(|p| p.nonce.clone())
    }

    pub fn resolve(&self, job_id: JobId, nonce: &str, decision: ApprovalDecision) -> Result<(), SentinelError> {
        let mut guard = self.pending.lock().expect("approval registry lock poisoned");

        match guard.get(&job_id) {
            Some(pending) if pending.nonce == nonce => {
                let pending = guard.remove(&job_id).expect("checked above");
                self.consumed.lock().expect("approval registry lock poisoned").insert(job_id, pending.nonce);
                pending.sender.send(decision).ok();
                Ok(())
            }
            Some(_) => Err(SentinelError::validation("approval nonce does not match the pending gate")),
            None => {
                let already_consumed = self.consumed.lock().expect("approval registry lock poisoned").get(&job_id) == Some(&nonce.to_string());
                if already_consumed {
                    Err(SentinelError::validation("approval nonce has already been consumed"))
                } else {
                    Err(SentinelError::not_found(format!("no pending approval for job {job_id}")))
                }
            }
        }
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peek_nonce_reflects_the_pending_gate_and_clears_once_resolved() {
        let registry = ApprovalRegistry::new();
        let job_id = JobId::new();
        let (nonce, _rx) = registry.issue_nonce(job_id);

        assert_eq!(registry.peek_nonce(job_id), Some(nonce.clone()));
        registry.resolve(job_id, &nonce, ApprovalDecision::Approved).unwrap();
        assert_eq!(registry.peek_nonce(job_id), None);
    }

    #[tokio::test]
    async fn approve_with_matching_nonce_resolves_the_waiter() {
        let registry = ApprovalRegistry::new();
        let job_id = JobId::new();
        let (nonce, rx) = registry.issue_nonce(job_id);

        registry.resolve(job_id, &nonce, ApprovalDecision::Approved).unwrap();

        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn approve_twice_with_the_same_nonce_fails_validation_the_second_time() {
        let registry = ApprovalRegistry::new();
        let job_id = JobId::new();
        let (nonce, _rx) = registry.issue_nonce(job_id);

        registry.resolve(job_id, &nonce, ApprovalDecision::Approved).unwrap();
        let err = registry.resolve(job_id, &nonce, ApprovalDecision::Approved).unwrap_err();

        assert_eq!(err.kind, sentinel_types::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn approve_with_wrong_nonce_fails_validation_and_leaves_the_gate_pending() {
        let registry = ApprovalRegistry::new();
        let job_id = JobId::new();
        let (_nonce, _rx) = registry.issue_nonce(job_id);

        let err = registry.resolve(job_id, "not-the-real-nonce", ApprovalDecision::Approved).unwrap_err();
        assert_eq!(err.kind, sentinel_types::ErrorKind::Validation);
    }
}
