use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use pacer_core::config::{GovernorConfig, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config; exits non-zero on errors
    Validate,

    /// Show the effective configuration
    Show,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::Show => show(root, json),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = GovernorConfig::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = GovernorConfig::load(root).context("failed to load config")?;

    if json {
        return print_json(&config);
    }

    let opt = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |n| n.to_string());
    let rows = config
        .classes
        .iter()
        .map(|(class, p)| {
            vec![
                class.to_string(),
                p.priority.to_string(),
                opt(p.hourly_cap.map(u64::from)),
                opt(p.daily_cap.map(u64::from)),
                opt(p.min_interval_secs),
                opt(p.daily_target.map(u64::from)),
                format!("{:.0}%", p.jitter_fraction * 100.0),
                p.dedup_scope.to_string(),
            ]
        })
        .collect();
    print_table(
        &[
            "CLASS", "PRIORITY", "HOURLY", "DAILY", "MIN_SECS", "TARGET", "JITTER", "DEDUP",
        ],
        rows,
    );

    println!();
    println!(
        "account_hourly_cap: {}",
        opt(config.account_hourly_cap.map(u64::from))
    );
    println!("urgency_bypass_threshold: {}", config.urgency_bypass_threshold);
    println!("max_admissions_per_tick: {}", config.max_admissions_per_tick);
    println!("stale_pending_minutes: {}", config.stale_pending_minutes);
    println!("retention_days: {}", config.retention_days);
    println!(
        "breaker: {} failures -> {}m pause",
        config.breaker.failure_threshold, config.breaker.pause_minutes
    );
    Ok(())
}
