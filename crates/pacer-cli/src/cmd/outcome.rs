use crate::output::print_json;
use anyhow::Context;
use std::path::Path;

pub fn commit(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id = super::parse_entry_id(id)?;
    let mut gov = super::open_governor(root)?;
    let handle = gov
        .entry(id)
        .map(|e| e.handle())
        .with_context(|| format!("no ledger entry {id}"))?;
    gov.commit(&handle).context("commit failed")?;

    if json {
        return print_json(&serde_json::json!({ "id": id, "outcome": "committed" }));
    }
    println!("committed {} {} '{}'", id, handle.class, handle.target_id);
    Ok(())
}

pub fn abandon(root: &Path, id: &str, reason: &str, json: bool) -> anyhow::Result<()> {
    let id = super::parse_entry_id(id)?;
    let mut gov = super::open_governor(root)?;
    let handle = gov
        .entry(id)
        .map(|e| e.handle())
        .with_context(|| format!("no ledger entry {id}"))?;
    let changed = gov.abandon(&handle, reason).context("abandon failed")?;
    let paused = gov.status().paused;

    if json {
        return print_json(&serde_json::json!({
            "id": id,
            "outcome": "abandoned",
            "changed": changed,
            "paused": paused,
        }));
    }
    if changed {
        println!("abandoned {} {} '{}'", id, handle.class, handle.target_id);
    } else {
        println!("{id} was already abandoned");
    }
    if paused {
        println!("admissions are paused after repeated failures");
    }
    Ok(())
}
