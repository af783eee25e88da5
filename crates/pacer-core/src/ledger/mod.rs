//! Durable admission ledger.
//!
//! Provides `LedgerEntry`, `Outcome`, `EntryHandle` and `Ledger`, the single
//! enforcement point for "never act twice on the same target". Every mutation
//! is written through `GovernorDb` before the in-memory index changes, so a
//! successful `record` is both durable and immediately visible to `seen`.

pub mod db;
pub mod entry;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PacerError, Result};
use crate::types::ActionClass;

pub use db::{Batch, GovernorDb, StateTable};
pub use entry::{EntryHandle, LedgerEntry, Outcome};

/// Filter for [`Ledger::list`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub class: Option<ActionClass>,
    pub pending_only: bool,
}

pub struct Ledger {
    db: GovernorDb,
    entries: HashMap<Uuid, LedgerEntry>,
    /// Active (non-abandoned) dedup-scoped entries by `(class, target_id)`.
    active: HashMap<(ActionClass, String), Uuid>,
}

impl Ledger {
    /// Load every persisted entry and rebuild the dedup index.
    pub fn open(db: GovernorDb) -> Result<Self> {
        let mut ledger = Self {
            db,
            entries: HashMap::new(),
            active: HashMap::new(),
        };
        for entry in ledger.db.load_entries()? {
            if entry.dedup && entry.outcome.is_active() {
                let key = (entry.class, entry.target_id.clone());
                if let Some(existing) = ledger.active.get(&key) {
                    tracing::warn!(
                        class = %entry.class,
                        target = %entry.target_id,
                        kept = %existing,
                        dropped = %entry.id,
                        "duplicate active ledger entries on reload"
                    );
                } else {
                    ledger.active.insert(key, entry.id);
                }
            }
            ledger.entries.insert(entry.id, entry);
        }
        tracing::debug!(
            entries = ledger.entries.len(),
            active = ledger.active.len(),
            "ledger loaded"
        );
        Ok(ledger)
    }

    /// True if an active dedup-scoped entry exists for `(class, target_id)`.
    pub fn seen(&self, class: ActionClass, target_id: &str) -> bool {
        self.active.contains_key(&(class, target_id.to_string()))
    }

    /// Create a `Pending` entry, persisting it together with `also`.
    ///
    /// Fails with `AlreadyActioned` when `dedup` is set and an active entry
    /// already covers the target. Nothing is written in that case.
    pub fn record(
        &mut self,
        class: ActionClass,
        target_id: &str,
        dedup: bool,
        now: DateTime<Utc>,
        mut also: Batch,
    ) -> Result<EntryHandle> {
        if dedup && self.seen(class, target_id) {
            return Err(PacerError::AlreadyActioned {
                class,
                target_id: target_id.to_string(),
            });
        }
        let entry = LedgerEntry::new_pending(class, target_id, now, dedup);
        also.put_entry(&entry)?;
        self.db.apply(&also)?;

        let handle = entry.handle();
        if dedup {
            self.active
                .insert((class, target_id.to_string()), entry.id);
        }
        self.entries.insert(entry.id, entry);
        Ok(handle)
    }

    /// Mark a pending entry as committed. Committing twice is a no-op.
    pub fn commit(&mut self, id: Uuid, now: DateTime<Utc>, mut also: Batch) -> Result<()> {
        let entry = self.entries.get(&id).ok_or(PacerError::EntryNotFound(id))?;
        match &entry.outcome {
            Outcome::Committed { .. } => return Ok(()),
            Outcome::Abandoned { .. } => {
                return Err(PacerError::InvalidTransition {
                    id,
                    from: entry.outcome.name().to_string(),
                    to: "committed".to_string(),
                })
            }
            Outcome::Pending => {}
        }
        let mut updated = entry.clone();
        updated.outcome = Outcome::Committed { at: now };
        also.put_entry(&updated)?;
        self.db.apply(&also)?;
        self.entries.insert(id, updated);
        Ok(())
    }

    /// Abandon a pending entry, freeing its target. Returns `false` if the
    /// entry was already abandoned.
    pub fn abandon(
        &mut self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
        mut also: Batch,
    ) -> Result<bool> {
        let entry = self.entries.get(&id).ok_or(PacerError::EntryNotFound(id))?;
        match &entry.outcome {
            Outcome::Abandoned { .. } => return Ok(false),
            Outcome::Committed { .. } => {
                return Err(PacerError::InvalidTransition {
                    id,
                    from: entry.outcome.name().to_string(),
                    to: "abandoned".to_string(),
                })
            }
            Outcome::Pending => {}
        }
        let mut updated = entry.clone();
        updated.outcome = Outcome::Abandoned {
            at: now,
            reason: reason.to_string(),
        };
        also.put_entry(&updated)?;
        self.db.apply(&also)?;

        let key = (updated.class, updated.target_id.clone());
        if self.active.get(&key) == Some(&id) {
            self.active.remove(&key);
        }
        self.entries.insert(id, updated);
        Ok(true)
    }

    /// Pending entries admitted before `cutoff`, oldest first.
    pub fn stale_pending(&self, cutoff: DateTime<Utc>) -> Vec<EntryHandle> {
        let mut stale: Vec<&LedgerEntry> = self
            .entries
            .values()
            .filter(|e| e.is_pending() && e.admitted_at < cutoff)
            .collect();
        stale.sort_by_key(|e| (e.admitted_at, e.id));
        stale.into_iter().map(LedgerEntry::handle).collect()
    }

    /// Delete resolved entries admitted before `cutoff`. Pending entries are
    /// left for reconciliation. Returns the number removed.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<LedgerEntry> = self
            .db
            .entries_before(cutoff)?
            .into_iter()
            .filter(|e| !e.is_pending())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let mut batch = Batch::new();
        for entry in &expired {
            batch.remove_entry(entry);
        }
        self.db.apply(&batch)?;

        for entry in &expired {
            let key = (entry.class, entry.target_id.clone());
            if self.active.get(&key) == Some(&entry.id) {
                self.active.remove(&key);
            }
            self.entries.remove(&entry.id);
        }
        Ok(expired.len())
    }

    pub fn get(&self, id: Uuid) -> Option<&LedgerEntry> {
        self.entries.get(&id)
    }

    /// Entries matching `filter`, newest first.
    pub fn list(&self, filter: &EntryFilter) -> Vec<LedgerEntry> {
        let mut result: Vec<LedgerEntry> = self
            .entries
            .values()
            .filter(|e| filter.class.map_or(true, |c| c == e.class))
            .filter(|e| !filter.pending_only || e.is_pending())
            .cloned()
            .collect();
        result.sort_by(|a, b| b.admitted_at.cmp(&a.admitted_at).then(a.id.cmp(&b.id)));
        result
    }

    pub fn pending_count(&self, class: ActionClass) -> usize {
        self.entries
            .values()
            .filter(|e| e.class == class && e.is_pending())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as CDur;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Ledger) {
        let dir = TempDir::new().unwrap();
        let db = GovernorDb::open(&dir.path().join("ledger.redb")).unwrap();
        (dir, Ledger::open(db).unwrap())
    }

    #[test]
    fn record_then_seen() {
        let (_dir, mut ledger) = open_tmp();
        assert!(!ledger.seen(ActionClass::Follow, "userA"));
        ledger
            .record(ActionClass::Follow, "userA", true, Utc::now(), Batch::new())
            .unwrap();
        assert!(ledger.seen(ActionClass::Follow, "userA"));
        assert!(!ledger.seen(ActionClass::Unfollow, "userA"));
    }

    #[test]
    fn duplicate_record_fails() {
        let (_dir, mut ledger) = open_tmp();
        ledger
            .record(ActionClass::Follow, "userA", true, Utc::now(), Batch::new())
            .unwrap();
        let err = ledger
            .record(ActionClass::Follow, "userA", true, Utc::now(), Batch::new())
            .unwrap_err();
        assert!(matches!(err, PacerError::AlreadyActioned { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn non_dedup_class_allows_repeats() {
        let (_dir, mut ledger) = open_tmp();
        for _ in 0..3 {
            ledger
                .record(ActionClass::DirectMessage, "userB", false, Utc::now(), Batch::new())
                .unwrap();
        }
        assert_eq!(ledger.len(), 3);
        assert!(!ledger.seen(ActionClass::DirectMessage, "userB"));
    }

    #[test]
    fn abandon_frees_target() {
        let (_dir, mut ledger) = open_tmp();
        let h = ledger
            .record(ActionClass::Reply, "tweet-1", true, Utc::now(), Batch::new())
            .unwrap();
        assert!(ledger
            .abandon(h.id, "executor failed", Utc::now(), Batch::new())
            .unwrap());
        assert!(!ledger.seen(ActionClass::Reply, "tweet-1"));
        ledger
            .record(ActionClass::Reply, "tweet-1", true, Utc::now(), Batch::new())
            .unwrap();
    }

    #[test]
    fn commit_keeps_target_blocked() {
        let (_dir, mut ledger) = open_tmp();
        let h = ledger
            .record(ActionClass::Reply, "tweet-2", true, Utc::now(), Batch::new())
            .unwrap();
        ledger.commit(h.id, Utc::now(), Batch::new()).unwrap();
        ledger.commit(h.id, Utc::now(), Batch::new()).unwrap();
        assert!(ledger.seen(ActionClass::Reply, "tweet-2"));
        assert_eq!(ledger.get(h.id).unwrap().outcome.name(), "committed");
    }

    #[test]
    fn commit_after_abandon_is_rejected() {
        let (_dir, mut ledger) = open_tmp();
        let h = ledger
            .record(ActionClass::Reply, "tweet-3", true, Utc::now(), Batch::new())
            .unwrap();
        ledger.abandon(h.id, "timeout", Utc::now(), Batch::new()).unwrap();
        let err = ledger.commit(h.id, Utc::now(), Batch::new()).unwrap_err();
        assert!(matches!(err, PacerError::InvalidTransition { .. }));
    }

    #[test]
    fn unknown_entry_errors() {
        let (_dir, mut ledger) = open_tmp();
        let err = ledger
            .commit(Uuid::new_v4(), Utc::now(), Batch::new())
            .unwrap_err();
        assert!(matches!(err, PacerError::EntryNotFound(_)));
    }

    #[test]
    fn reload_restores_dedup_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.redb");
        {
            let mut ledger = Ledger::open(GovernorDb::open(&path).unwrap()).unwrap();
            ledger
                .record(ActionClass::Follow, "userA", true, Utc::now(), Batch::new())
                .unwrap();
            let h = ledger
                .record(ActionClass::Follow, "userB", true, Utc::now(), Batch::new())
                .unwrap();
            ledger.abandon(h.id, "failed", Utc::now(), Batch::new()).unwrap();
        }
        let ledger = Ledger::open(GovernorDb::open(&path).unwrap()).unwrap();
        assert!(ledger.seen(ActionClass::Follow, "userA"));
        assert!(!ledger.seen(ActionClass::Follow, "userB"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn stale_pending_lists_only_old_pending() {
        let (_dir, mut ledger) = open_tmp();
        let now = Utc::now();
        let old = ledger
            .record(ActionClass::Reply, "old", true, now - CDur::minutes(30), Batch::new())
            .unwrap();
        let committed = ledger
            .record(ActionClass::Reply, "done", true, now - CDur::minutes(30), Batch::new())
            .unwrap();
        ledger.commit(committed.id, now, Batch::new()).unwrap();
        ledger
            .record(ActionClass::Reply, "fresh", true, now, Batch::new())
            .unwrap();

        let stale = ledger.stale_pending(now - CDur::minutes(10));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[test]
    fn prune_removes_resolved_old_entries() {
        let (_dir, mut ledger) = open_tmp();
        let now = Utc::now();
        let ancient = ledger
            .record(ActionClass::Follow, "userA", true, now - CDur::days(40), Batch::new())
            .unwrap();
        ledger.commit(ancient.id, now - CDur::days(40), Batch::new()).unwrap();
        ledger
            .record(ActionClass::Follow, "userB", true, now - CDur::days(40), Batch::new())
            .unwrap();
        ledger
            .record(ActionClass::Follow, "userC", true, now, Batch::new())
            .unwrap();

        let removed = ledger.prune(now - CDur::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(!ledger.seen(ActionClass::Follow, "userA"));
        assert!(ledger.seen(ActionClass::Follow, "userB"), "pending entries survive pruning");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn list_filters_by_class_and_pending() {
        let (_dir, mut ledger) = open_tmp();
        let now = Utc::now();
        let h = ledger
            .record(ActionClass::Reply, "a", true, now, Batch::new())
            .unwrap();
        ledger.commit(h.id, now, Batch::new()).unwrap();
        ledger
            .record(ActionClass::Reply, "b", true, now, Batch::new())
            .unwrap();
        ledger
            .record(ActionClass::Follow, "c", true, now, Batch::new())
            .unwrap();

        let replies = ledger.list(&EntryFilter {
            class: Some(ActionClass::Reply),
            pending_only: false,
        });
        assert_eq!(replies.len(), 2);
        let pending = ledger.list(&EntryFilter {
            class: None,
            pending_only: true,
        });
        assert_eq!(pending.len(), 2);
        assert_eq!(ledger.pending_count(ActionClass::Reply), 1);
    }
}
