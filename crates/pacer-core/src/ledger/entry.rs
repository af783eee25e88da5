//! Ledger record types.
//!
//! A `LedgerEntry` is created when a candidate is admitted and moves through
//! `Pending → Committed | Abandoned`. The executor reports the transition;
//! reconciliation abandons entries whose executor never reported back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::ActionClass;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// Admitted; the executor has not reported yet.
    Pending,
    Committed { at: DateTime<Utc> },
    /// Frees the target for a future attempt. Budget spent stays spent.
    Abandoned { at: DateTime<Utc>, reason: String },
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Committed { .. } => "committed",
            Outcome::Abandoned { .. } => "abandoned",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Outcome::Abandoned { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// EntryHandle
// ---------------------------------------------------------------------------

/// Returned to the producer on admission and passed back on commit/abandon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryHandle {
    pub id: Uuid,
    pub class: ActionClass,
    pub target_id: String,
    pub admitted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub class: ActionClass,
    pub target_id: String,
    pub admitted_at: DateTime<Utc>,
    pub outcome: Outcome,
    /// Whether this entry participates in duplicate suppression.
    #[serde(default = "default_dedup")]
    pub dedup: bool,
}

fn default_dedup() -> bool {
    true
}

impl LedgerEntry {
    pub fn new_pending(
        class: ActionClass,
        target_id: impl Into<String>,
        admitted_at: DateTime<Utc>,
        dedup: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            class,
            target_id: target_id.into(),
            admitted_at,
            outcome: Outcome::Pending,
            dedup,
        }
    }

    pub fn handle(&self) -> EntryHandle {
        EntryHandle {
            id: self.id,
            class: self.class,
            target_id: self.target_id.clone(),
            admitted_at: self.admitted_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, Outcome::Pending)
    }
}
