use crate::output::{format_time, print_json, print_table};
use clap::Subcommand;
use pacer_core::ledger::Outcome;
use pacer_core::EntryFilter;
use std::path::Path;

#[derive(Subcommand)]
pub enum LedgerSubcommand {
    /// List entries, newest first
    List {
        #[arg(long)]
        class: Option<String>,
        /// Only entries still awaiting an executor report
        #[arg(long)]
        pending: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

pub fn run(root: &Path, subcmd: LedgerSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        LedgerSubcommand::List {
            class,
            pending,
            limit,
        } => list(root, class.as_deref(), pending, limit, json),
    }
}

fn list(
    root: &Path,
    class: Option<&str>,
    pending_only: bool,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let filter = EntryFilter {
        class: class.map(super::parse_class).transpose()?,
        pending_only,
    };
    let gov = super::open_governor(root)?;
    let mut entries = gov.entries(&filter);
    entries.truncate(limit);

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No ledger entries.");
        return Ok(());
    }

    let rows = entries
        .iter()
        .map(|e| {
            let detail = match &e.outcome {
                Outcome::Pending => String::new(),
                Outcome::Committed { at } => format_time(*at),
                Outcome::Abandoned { reason, .. } => reason.clone(),
            };
            vec![
                e.id.to_string(),
                e.class.to_string(),
                e.target_id.clone(),
                format_time(e.admitted_at),
                e.outcome.to_string(),
                detail,
            ]
        })
        .collect();
    print_table(
        &["ID", "CLASS", "TARGET", "ADMITTED", "OUTCOME", "DETAIL"],
        rows,
    );
    Ok(())
}
