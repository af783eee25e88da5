use crate::output::{format_time, print_json};
use anyhow::Context;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let mut gov = super::open_governor(root)?;
    let report = gov.reconcile().context("reconciliation failed")?;

    if json {
        return print_json(&report);
    }
    if report.abandoned.is_empty() {
        println!("No stale pending entries.");
    }
    for h in &report.abandoned {
        println!(
            "abandoned stale {} {} '{}' (admitted {})",
            h.id,
            h.class,
            h.target_id,
            format_time(h.admitted_at)
        );
    }
    if report.pruned > 0 {
        println!("pruned {} entries past retention", report.pruned);
    }
    Ok(())
}
