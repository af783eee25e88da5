//! Durable governor state using redb.
//!
//! # Table design
//!
//! `LEDGER` uses a 24-byte composite key:
//! ```text
//! [ admitted_at_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Byte ordering equals admission-time ordering, so "everything admitted
//! before T" is a single range scan `..upper_bound(T)`. Stale-pending sweeps
//! and retention pruning both use it.
//!
//! `WINDOWS`, `COOLDOWNS` and `META` are small keyed tables holding JSON
//! snapshots of the rate windows, the per-class cooldown state and the
//! failure breaker. They are rewritten in the same write transaction as the
//! ledger entry that caused the change, so a reload never sees an admission
//! without its budget consumption.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{PacerError, Result};

use super::entry::LedgerEntry;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: 24-byte composite (admitted_at_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded LedgerEntry
const LEDGER: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ledger");
const WINDOWS: TableDefinition<&str, &[u8]> = TableDefinition::new("windows");
const COOLDOWNS: TableDefinition<&str, &[u8]> = TableDefinition::new("cooldowns");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Keyed snapshot tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTable {
    Windows,
    Cooldowns,
    Meta,
}

impl StateTable {
    fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            StateTable::Windows => WINDOWS,
            StateTable::Cooldowns => COOLDOWNS,
            StateTable::Meta => META,
        }
    }
}

fn db_err(e: impl std::fmt::Display) -> PacerError {
    PacerError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn entry_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Exclusive upper bound selecting every entry admitted strictly before `ts`.
///
/// The UUID suffix is all zeroes, which sorts below any entry sharing the
/// same millisecond, so those are excluded.
fn before_bound(ts: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A set of writes applied atomically by [`GovernorDb::apply`].
#[derive(Debug, Default)]
pub struct Batch {
    entries: Vec<([u8; 24], Vec<u8>)>,
    removals: Vec<[u8; 24]>,
    state: Vec<(StateTable, String, Vec<u8>)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        let key = entry_key(entry.admitted_at, entry.id);
        self.entries.push((key, serde_json::to_vec(entry)?));
        Ok(())
    }

    pub fn remove_entry(&mut self, entry: &LedgerEntry) {
        self.removals.push(entry_key(entry.admitted_at, entry.id));
    }

    pub fn put_state<T: Serialize>(
        &mut self,
        table: StateTable,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        self.state
            .push((table, key.into(), serde_json::to_vec(value)?));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removals.is_empty() && self.state.is_empty()
    }
}

// ---------------------------------------------------------------------------
// GovernorDb
// ---------------------------------------------------------------------------

/// Persistent store for ledger entries and governor state snapshots.
pub struct GovernorDb {
    db: Database,
}

impl GovernorDb {
    /// Open or create the redb database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        // Ensure the tables exist before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(LEDGER).map_err(db_err)?;
        wt.open_table(WINDOWS).map_err(db_err)?;
        wt.open_table(COOLDOWNS).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Apply every write in `batch` inside one durable transaction.
    pub fn apply(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut ledger = wt.open_table(LEDGER).map_err(db_err)?;
            for key in &batch.removals {
                ledger.remove(key.as_slice()).map_err(db_err)?;
            }
            for (key, value) in &batch.entries {
                ledger
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(db_err)?;
            }
        }
        for (table, key, value) in &batch.state {
            let mut t = wt.open_table(table.definition()).map_err(db_err)?;
            t.insert(key.as_str(), value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Every ledger entry, in admission order.
    pub fn load_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(LEDGER).map_err(db_err)?;

        let mut result = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (_, v) = row.map_err(db_err)?;
            let entry: LedgerEntry = serde_json::from_slice(v.value())?;
            result.push(entry);
        }
        Ok(result)
    }

    /// Entries admitted strictly before `cutoff`, oldest first.
    pub fn entries_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        let upper = before_bound(cutoff);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(LEDGER).map_err(db_err)?;

        let mut result = Vec::new();
        for row in table.range(..upper.as_slice()).map_err(db_err)? {
            let (_, v) = row.map_err(db_err)?;
            let entry: LedgerEntry = serde_json::from_slice(v.value())?;
            result.push(entry);
        }
        Ok(result)
    }

    /// All rows of a snapshot table, decoded.
    pub fn load_state<T: DeserializeOwned>(&self, table: StateTable) -> Result<Vec<(String, T)>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table.definition()).map_err(db_err)?;

        let mut result = Vec::new();
        for row in t.iter().map_err(db_err)? {
            let (k, v) = row.map_err(db_err)?;
            let value: T = serde_json::from_slice(v.value())?;
            result.push((k.value().to_string(), value));
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
