pub mod config;
pub mod evaluate;
pub mod init;
pub mod ledger;
pub mod outcome;
pub mod propose;
pub mod reconcile;
pub mod run;
pub mod spike;
pub mod status;

use anyhow::Context;
use pacer_core::{ActionClass, Governor, SystemClock};
use std::path::Path;
use std::sync::Arc;

/// Open the governor under `root`. The store is exclusively locked while the
/// returned value lives, so a running `pacer run` blocks other commands.
pub fn open_governor(root: &Path) -> anyhow::Result<Governor> {
    Governor::open_root(root, Arc::new(SystemClock::new()))
        .with_context(|| format!("failed to open governor at {}", root.display()))
}

pub fn parse_class(s: &str) -> anyhow::Result<ActionClass> {
    s.parse::<ActionClass>()
        .with_context(|| format!("invalid --class '{s}'"))
}

pub fn parse_entry_id(s: &str) -> anyhow::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s).with_context(|| format!("invalid entry id '{s}'"))
}
