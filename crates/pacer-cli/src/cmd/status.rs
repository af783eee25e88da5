use crate::output::{format_time, print_json, print_table};
use pacer_core::budget::WindowUsage;
use pacer_core::GovernorStatus;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let mut gov = super::open_governor(root)?;
    let status = gov.status();

    if json {
        return print_json(&status);
    }
    print_status(&status);
    Ok(())
}

pub fn print_status(status: &GovernorStatus) {
    let usage = |windows: &[WindowUsage]| -> String {
        if windows.is_empty() {
            return "unlimited".to_string();
        }
        windows
            .iter()
            .map(|w| format!("{} {}/{}", w.kind.as_str(), w.used, w.cap))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let rows = status
        .classes
        .iter()
        .map(|c| {
            vec![
                c.class.to_string(),
                c.priority.to_string(),
                usage(&c.windows),
                c.next_eligible_at
                    .filter(|at| *at > status.at)
                    .map_or_else(|| "now".to_string(), format_time),
                c.fired_today.to_string(),
                c.pending.to_string(),
            ]
        })
        .collect();
    print_table(
        &["CLASS", "PRIORITY", "USAGE", "NEXT", "TODAY", "PENDING"],
        rows,
    );

    println!();
    match &status.account {
        Some(a) => println!("account: {}/{} this hour", a.used, a.cap),
        None => println!("account: uncapped"),
    }
    if status.paused {
        if let Some(until) = status.breaker.paused_until {
            println!("PAUSED until {} after repeated failures", format_time(until));
        }
    } else if status.breaker.consecutive_failures > 0 {
        println!(
            "consecutive failures: {}",
            status.breaker.consecutive_failures
        );
    }
    println!("ledger entries: {}", status.ledger_entries);
}
