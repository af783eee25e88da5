//! Governor facade.
//!
//! Producers call [`Governor::propose`]; the tick owner calls
//! [`Governor::tick`] once per evaluation cycle. A proposal passes, in order:
//! class enabled, dedup (ledger and same-tick), failure pause, cooldown and
//! a tentative rate-budget reservation. Survivors wait in the ready set until
//! the tick, where the arbiter picks at most `max_admissions_per_tick` of
//! them. Every reservation is then released and each winner takes its slot
//! again in the minute it is admitted.
//!
//! An admission writes the ledger entry, the touched window snapshots and the
//! class cooldown in one store transaction before `Admit` is returned.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::arbiter::PriorityArbiter;
use crate::budget::{RateBudget, Reservation, WindowSnapshot, WindowUsage};
use crate::clock::Clock;
use crate::config::GovernorConfig;
use crate::cooldown::{CooldownScheduler, CooldownState};
use crate::error::{PacerError, Result};
use crate::ledger::{Batch, EntryFilter, EntryHandle, GovernorDb, Ledger, LedgerEntry, StateTable};
use crate::paths;
use crate::spike::{SpikeOutcome, SpikeScore, SpikeScorer, SpikeSignal};
use crate::types::{ActionClass, Candidate, Decision, DeferReason, Proposal, ProposalId, RejectReason};

const BREAKER_KEY: &str = "breaker";

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Consecutive-failure tracking persisted in the `meta` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub paused_until: Option<DateTime<Utc>>,
}

impl BreakerState {
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| now < until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDecision {
    pub proposal: ProposalId,
    pub candidate: Candidate,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    /// Every ready proposal, in service order.
    pub decisions: Vec<TickDecision>,
}

impl TickReport {
    pub fn admitted(&self) -> impl Iterator<Item = &TickDecision> {
        self.decisions.iter().filter(|d| d.decision.is_admit())
    }

    pub fn decision_for(&self, id: ProposalId) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|d| d.proposal == id)
            .map(|d| &d.decision)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub at: DateTime<Utc>,
    /// Pending entries abandoned for exceeding the stale timeout.
    pub abandoned: Vec<EntryHandle>,
    /// Resolved entries removed for exceeding retention.
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatus {
    pub class: ActionClass,
    pub priority: i32,
    pub windows: Vec<WindowUsage>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub fired_today: u32,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub at: DateTime<Utc>,
    pub classes: Vec<ClassStatus>,
    pub account: Option<WindowUsage>,
    pub breaker: BreakerState,
    pub paused: bool,
    pub ready: usize,
    pub ledger_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakingOutcome {
    /// No signal qualified; the outcome says why.
    NoSpike { outcome: SpikeOutcome },
    /// A spike was found and proposed as a breaking post.
    Decided {
        signal: SpikeSignal,
        score: SpikeScore,
        decision: Decision,
    },
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

struct ReadyProposal {
    id: ProposalId,
    candidate: Candidate,
    reservation: Reservation,
}

enum Plan {
    Admit,
    Resolved(Decision),
    /// An earlier winner of the same paced class fired this tick.
    CooledByWinner,
}

pub struct Governor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    budget: RateBudget,
    cooldowns: CooldownScheduler,
    arbiter: PriorityArbiter,
    scorer: SpikeScorer,
    breaker: BreakerState,
    ready: Vec<ReadyProposal>,
    next_proposal: u64,
    _scratch: Option<TempDir>,
}

impl Governor {
    /// Open (or create) the store at `db_path` and reload all state.
    /// Refuses to start on an invalid configuration.
    pub fn open(db_path: &Path, config: GovernorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::open_with_rng(db_path, config, clock, StdRng::from_entropy())
    }

    /// Like [`open`](Self::open) with a caller-supplied jitter source.
    pub fn open_with_rng(
        db_path: &Path,
        config: GovernorConfig,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Result<Self> {
        config.ensure_valid()?;
        let db = GovernorDb::open(db_path)?;
        Self::from_db(db, config, clock, rng, None)
    }

    /// Load `.pacer/config.yaml` under `root` and open `.pacer/governor.redb`.
    pub fn open_root(root: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = GovernorConfig::load(root)?;
        Self::open(&paths::db_path(root), config, clock)
    }

    /// Governor backed by a store in a private temporary directory, removed
    /// when the governor is dropped.
    pub fn in_memory(config: GovernorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.ensure_valid()?;
        let scratch = TempDir::new()?;
        let db = GovernorDb::open(&scratch.path().join("governor.redb"))?;
        Self::from_db(db, config, clock, StdRng::from_entropy(), Some(scratch))
    }

    fn from_db(
        db: GovernorDb,
        config: GovernorConfig,
        clock: Arc<dyn Clock>,
        rng: StdRng,
        scratch: Option<TempDir>,
    ) -> Result<Self> {
        let now = clock.now();

        let mut budget = RateBudget::from_config(&config, now);
        let windows: Vec<(String, WindowSnapshot)> = db.load_state(StateTable::Windows)?;
        budget.restore(&windows, now);

        let mut cooldowns = CooldownScheduler::with_rng(&config, rng);
        let cooldown_states: Vec<(String, CooldownState)> = db.load_state(StateTable::Cooldowns)?;
        cooldowns.restore(cooldown_states);

        let breaker = db
            .load_state::<BreakerState>(StateTable::Meta)?
            .into_iter()
            .find(|(k, _)| k == BREAKER_KEY)
            .map(|(_, v)| v)
            .unwrap_or_default();

        let ledger = Ledger::open(db)?;
        tracing::info!(
            entries = ledger.len(),
            windows = windows.len(),
            paused = breaker.is_paused(now),
            "governor state reloaded"
        );

        Ok(Self {
            arbiter: PriorityArbiter::from_config(&config),
            scorer: SpikeScorer::new(config.spike.clone()),
            config,
            clock,
            ledger,
            budget,
            cooldowns,
            breaker,
            ready: Vec::new(),
            next_proposal: 0,
            _scratch: scratch,
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Proposals waiting for the next tick.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    // -----------------------------------------------------------------------
    // Proposal and tick
    // -----------------------------------------------------------------------

    /// Run the pre-arbitration checks. A candidate that passes is parked in
    /// the ready set with its budget slot reserved.
    pub fn propose(&mut self, candidate: Candidate) -> Result<Proposal> {
        let now = self.clock.now();
        let class = candidate.class;

        let Some(policy) = self.config.policy(class) else {
            tracing::debug!(class = %class, target = %candidate.target_id, "rejected: class disabled");
            return Ok(Proposal::Decided(Decision::Reject {
                reason: RejectReason::ClassDisabled,
            }));
        };

        if policy.dedup_scope {
            let queued = self
                .ready
                .iter()
                .any(|r| r.candidate.class == class && r.candidate.target_id == candidate.target_id);
            if queued || self.ledger.seen(class, &candidate.target_id) {
                tracing::debug!(class = %class, target = %candidate.target_id, "rejected: already actioned");
                return Ok(Proposal::Decided(Decision::Reject {
                    reason: RejectReason::AlreadyActioned,
                }));
            }
        }

        if let Some(until) = self.breaker.paused_until.filter(|u| now < *u) {
            return Ok(Proposal::Decided(defer(DeferReason::Paused, until)));
        }

        if let Some(at) = self
            .cooldowns
            .next_eligible_at(class)
            .filter(|at| now < *at)
        {
            tracing::debug!(class = %class, next_eligible_at = %at, "deferred: cooldown");
            return Ok(Proposal::Decided(defer(DeferReason::CooldownActive, at)));
        }

        let Some(reservation) = self.budget.reserve(class, now) else {
            let at = self.budget.retry_after(class, now);
            tracing::debug!(class = %class, retry_after = %at, "deferred: rate exceeded");
            return Ok(Proposal::Decided(defer(DeferReason::RateExceeded, at)));
        };

        self.next_proposal += 1;
        let id = ProposalId(self.next_proposal);
        self.ready.push(ReadyProposal {
            id,
            candidate,
            reservation,
        });
        Ok(Proposal::Ready(id))
    }

    /// Resolve every ready proposal.
    ///
    /// Every tentative reservation is released once the winners are chosen.
    /// Each winner then takes its slot again in the current minute right
    /// before it is recorded, so window buckets hold the admission minute and
    /// each persisted snapshot carries only admissions recorded so far. On a
    /// store failure the error is returned; nothing is admitted that was not
    /// durably recorded.
    pub fn tick(&mut self) -> Result<TickReport> {
        let now = self.clock.now();
        let ready = std::mem::take(&mut self.ready);
        let order = self.arbiter.order(ready.iter().map(|r| &r.candidate));
        let mut slots: Vec<Option<ReadyProposal>> = ready.into_iter().map(Some).collect();

        // Pass 1: choose winners, release every reservation.
        let limit = self.config.max_admissions_per_tick as usize;
        let mut selected = 0usize;
        let mut paced_this_tick = HashSet::new();
        let mut plan: Vec<(ReadyProposal, Plan)> = Vec::with_capacity(slots.len());
        for idx in order {
            let Some(proposal) = slots[idx].take() else {
                continue;
            };
            let class = proposal.candidate.class;
            let step = if selected >= limit {
                Plan::Resolved(defer(DeferReason::NotSelected, now))
            } else if let Some(until) = self.breaker.paused_until.filter(|u| now < *u) {
                Plan::Resolved(defer(DeferReason::Paused, until))
            } else if let Some(at) = self.cooldowns.next_eligible_at(class).filter(|at| now < *at) {
                Plan::Resolved(defer(DeferReason::CooldownActive, at))
            } else if paced_this_tick.contains(&class) {
                Plan::CooledByWinner
            } else {
                selected += 1;
                if self.cooldowns.is_paced(class) {
                    paced_this_tick.insert(class);
                }
                Plan::Admit
            };
            self.budget.release(proposal.reservation);
            plan.push((proposal, step));
        }

        // Pass 2: record winners in service order.
        let mut decisions = Vec::with_capacity(plan.len());
        for (proposal, step) in plan {
            let class = proposal.candidate.class;
            let decision = match step {
                Plan::Resolved(decision) => decision,
                Plan::CooledByWinner => {
                    let at = self.cooldowns.next_eligible_at(class).unwrap_or(now);
                    defer(DeferReason::CooldownActive, at)
                }
                Plan::Admit => self.admit_winner(&proposal, now)?,
            };
            decisions.push(TickDecision {
                proposal: proposal.id,
                candidate: proposal.candidate,
                decision,
            });
        }

        if !decisions.is_empty() {
            tracing::debug!(ready = decisions.len(), admitted = selected, "tick complete");
        }
        Ok(TickReport { at: now, decisions })
    }

    /// Take the winner's slot in the current minute and record it.
    fn admit_winner(&mut self, proposal: &ReadyProposal, now: DateTime<Utc>) -> Result<Decision> {
        let class = proposal.candidate.class;
        let Some(slot) = self.budget.reserve(class, now) else {
            let at = self.budget.retry_after(class, now);
            return Ok(defer(DeferReason::RateExceeded, at));
        };
        match self.admit(proposal, now) {
            Ok(handle) => {
                tracing::info!(
                    class = %class,
                    target = %handle.target_id,
                    entry = %handle.id,
                    urgency = proposal.candidate.urgency_score,
                    "admitted"
                );
                Ok(Decision::Admit { handle })
            }
            Err(PacerError::AlreadyActioned { .. }) => {
                self.budget.release(slot);
                Ok(Decision::Reject {
                    reason: RejectReason::AlreadyActioned,
                })
            }
            Err(e) => {
                self.budget.release(slot);
                tracing::error!(class = %class, error = %e, "admission could not be recorded");
                Err(e)
            }
        }
    }

    fn admit(&mut self, proposal: &ReadyProposal, now: DateTime<Utc>) -> Result<EntryHandle> {
        let class = proposal.candidate.class;
        let dedup = self
            .config
            .policy(class)
            .map(|p| p.dedup_scope)
            .unwrap_or(true);

        let prior = self.cooldowns.state(class).cloned();
        let fired = self.cooldowns.mark_fired(class, now);

        let result = self.record_admission(
            class,
            &proposal.candidate.target_id,
            dedup,
            fired.as_ref(),
            now,
        );
        if result.is_err() {
            self.cooldowns.revert(class, prior);
        }
        result
    }

    fn record_admission(
        &mut self,
        class: ActionClass,
        target_id: &str,
        dedup: bool,
        cooldown: Option<&CooldownState>,
        now: DateTime<Utc>,
    ) -> Result<EntryHandle> {
        let mut batch = Batch::new();
        for (key, snap) in self.budget.snapshots_for(class) {
            batch.put_state(StateTable::Windows, key, &snap)?;
        }
        if let Some(state) = cooldown {
            batch.put_state(StateTable::Cooldowns, class.as_str(), state)?;
        }
        self.ledger.record(class, target_id, dedup, now, batch)
    }

    /// `propose` followed by a `tick`. Meant for a single producer that owns
    /// the tick; any other parked proposals are resolved by the same tick.
    pub fn evaluate(&mut self, candidate: Candidate) -> Result<Decision> {
        match self.propose(candidate)? {
            Proposal::Decided(decision) => Ok(decision),
            Proposal::Ready(id) => {
                if self.ready.len() > 1 {
                    tracing::warn!(
                        parked = self.ready.len() - 1,
                        "evaluate is resolving proposals parked by other producers"
                    );
                }
                let report = self.tick()?;
                Ok(report
                    .decision_for(id)
                    .cloned()
                    .unwrap_or_else(|| defer(DeferReason::NotSelected, report.at)))
            }
        }
    }

    /// Score `signals` and, if one spikes, propose it as a breaking post
    /// keyed by trend name. The spike's score becomes the urgency.
    pub fn propose_breaking(
        &mut self,
        signals: &[SpikeSignal],
        payload: serde_json::Value,
    ) -> Result<BreakingOutcome> {
        let (signal, score) = match self.scorer.evaluate(signals) {
            SpikeOutcome::Spike { signal, score, .. } => (signal, score),
            outcome => {
                tracing::info!("no breaking post: {outcome}");
                return Ok(BreakingOutcome::NoSpike { outcome });
            }
        };

        let candidate = Candidate::new(
            ActionClass::BreakingPost,
            signal.name.clone(),
            payload,
            self.clock.now(),
        )
        .with_urgency(score.score);
        let decision = self.evaluate(candidate)?;
        if !decision.is_admit() {
            tracing::info!(
                trend = %signal.name,
                score = score.score,
                "spike found but not admitted: {decision:?}"
            );
        }
        Ok(BreakingOutcome::Decided {
            signal,
            score,
            decision,
        })
    }

    pub fn scorer(&self) -> &SpikeScorer {
        &self.scorer
    }

    // -----------------------------------------------------------------------
    // Executor callbacks
    // -----------------------------------------------------------------------

    /// Record a successful execution. Resets the failure streak.
    pub fn commit(&mut self, handle: &EntryHandle) -> Result<()> {
        let now = self.clock.now();
        let mut batch = Batch::new();
        let mut breaker = self.breaker.clone();
        if breaker.consecutive_failures > 0 {
            breaker.consecutive_failures = 0;
            batch.put_state(StateTable::Meta, BREAKER_KEY, &breaker)?;
        }
        self.ledger.commit(handle.id, now, batch)?;
        self.breaker = breaker;
        tracing::info!(class = %handle.class, target = %handle.target_id, "committed");
        Ok(())
    }

    /// Record a failed execution, freeing the target. The budget slot stays
    /// spent. Enough consecutive failures pause all admissions. Returns
    /// `false` if the entry was already abandoned.
    pub fn abandon(&mut self, handle: &EntryHandle, reason: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut breaker = self.breaker.clone();
        breaker.consecutive_failures += 1;

        let threshold = self.config.breaker.failure_threshold;
        let mut tripped = false;
        if threshold > 0 && breaker.consecutive_failures >= threshold {
            let pause = Duration::minutes(self.config.breaker.pause_minutes as i64);
            breaker.paused_until = Some(now + pause);
            breaker.consecutive_failures = 0;
            tripped = true;
        }

        let mut batch = Batch::new();
        batch.put_state(StateTable::Meta, BREAKER_KEY, &breaker)?;
        let changed = self.ledger.abandon(handle.id, reason, now, batch)?;
        if !changed {
            return Ok(false);
        }
        self.breaker = breaker;

        tracing::info!(class = %handle.class, target = %handle.target_id, reason, "abandoned");
        if tripped {
            tracing::warn!(
                failures = threshold,
                paused_until = ?self.breaker.paused_until,
                "consecutive executor failures, pausing admissions"
            );
        }
        Ok(true)
    }

    pub fn entry(&self, id: uuid::Uuid) -> Option<&LedgerEntry> {
        self.ledger.get(id)
    }

    pub fn entries(&self, filter: &EntryFilter) -> Vec<LedgerEntry> {
        self.ledger.list(filter)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Abandon pending entries older than the stale timeout, then prune
    /// resolved entries past retention. Stale abandonment does not count
    /// toward the failure pause.
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        let now = self.clock.now();
        let stale_minutes = self.config.stale_pending_minutes;
        let cutoff = now - Duration::minutes(i64::from(stale_minutes));

        let mut abandoned = Vec::new();
        for handle in self.ledger.stale_pending(cutoff) {
            let reason = format!("stale pending: no executor report within {stale_minutes}m");
            if self.ledger.abandon(handle.id, &reason, now, Batch::new())? {
                tracing::warn!(
                    class = %handle.class,
                    target = %handle.target_id,
                    entry = %handle.id,
                    admitted_at = %handle.admitted_at,
                    "stale pending entry detected, abandoned"
                );
                abandoned.push(handle);
            }
        }

        let retention = now - Duration::days(i64::from(self.config.retention_days));
        let pruned = self.ledger.prune(retention)?;
        if pruned > 0 {
            tracing::info!(pruned, "ledger entries past retention removed");
        }

        Ok(ReconcileReport {
            at: now,
            abandoned,
            pruned,
        })
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&mut self) -> GovernorStatus {
        let now = self.clock.now();
        let policies: Vec<(ActionClass, i32)> = self
            .config
            .classes
            .iter()
            .map(|(c, p)| (*c, p.priority))
            .collect();

        let classes = policies
            .into_iter()
            .map(|(class, priority)| {
                let cooldown = self.cooldowns.state(class);
                ClassStatus {
                    class,
                    priority,
                    windows: self.budget.usage(class, now),
                    next_eligible_at: self.cooldowns.next_eligible_at(class),
                    fired_today: cooldown
                        .filter(|s| s.day == Some(now.date_naive()))
                        .map_or(0, |s| s.fired_today),
                    pending: self.ledger.pending_count(class),
                }
            })
            .collect();

        GovernorStatus {
            at: now,
            classes,
            account: self.budget.account_usage(now),
            paused: self.breaker.is_paused(now),
            breaker: self.breaker.clone(),
            ready: self.ready.len(),
            ledger_entries: self.ledger.len(),
        }
    }
}

fn defer(reason: DeferReason, retry_after: DateTime<Utc>) -> Decision {
    Decision::Defer {
        reason,
        retry_after,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
