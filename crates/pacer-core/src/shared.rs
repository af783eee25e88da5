//! Concurrent producer surface.
//!
//! `SharedGovernor` funnels every call through one `tokio::sync::Mutex`, so
//! two producers can never both observe the same free budget slot. A
//! proposal that reaches the ready set parks its caller on a oneshot channel
//! until the next `tick` resolves it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::error::{PacerError, Result};
use crate::governor::{Governor, GovernorStatus, ReconcileReport, TickReport};
use crate::ledger::EntryHandle;
use crate::types::{Candidate, Decision, Proposal, ProposalId};

struct Inner {
    governor: Governor,
    waiters: HashMap<ProposalId, oneshot::Sender<Decision>>,
}

#[derive(Clone)]
pub struct SharedGovernor {
    inner: Arc<Mutex<Inner>>,
}

impl SharedGovernor {
    pub fn new(governor: Governor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                governor,
                waiters: HashMap::new(),
            })),
        }
    }

    /// Submit a candidate. Resolves immediately for rejects and defers,
    /// otherwise when the next tick decides it.
    pub async fn propose(&self, candidate: Candidate) -> Result<Decision> {
        let rx = {
            let mut inner = self.inner.lock().await;
            match inner.governor.propose(candidate)? {
                Proposal::Decided(decision) => return Ok(decision),
                Proposal::Ready(id) => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.insert(id, tx);
                    rx
                }
            }
        };
        rx.await
            .map_err(|_| PacerError::TickAborted("waiting proposal".to_string()))
    }

    /// Run one tick and wake every producer it decided.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut inner = self.inner.lock().await;
        match inner.governor.tick() {
            Ok(report) => {
                for d in &report.decisions {
                    if let Some(tx) = inner.waiters.remove(&d.proposal) {
                        // A dropped receiver means the producer gave up; an
                        // admitted entry is left for reconciliation.
                        let _ = tx.send(d.decision.clone());
                    }
                }
                Ok(report)
            }
            Err(e) => {
                inner.waiters.clear();
                Err(e)
            }
        }
    }

    pub async fn commit(&self, handle: &EntryHandle) -> Result<()> {
        self.inner.lock().await.governor.commit(handle)
    }

    pub async fn abandon(&self, handle: &EntryHandle, reason: &str) -> Result<bool> {
        self.inner.lock().await.governor.abandon(handle, reason)
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.inner.lock().await.governor.reconcile()
    }

    pub async fn status(&self) -> GovernorStatus {
        self.inner.lock().await.governor.status()
    }

    /// Read from the governor under the lock. Ticks go through
    /// [`SharedGovernor::tick`] so parked producers are always woken.
    pub async fn with<R>(&self, f: impl FnOnce(&Governor) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.governor)
    }
}
