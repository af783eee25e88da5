use crate::cmd::evaluate::read_candidates;
use crate::output::describe_decision;
use anyhow::Context;
use pacer_core::{GovernorStatus, SharedGovernor};
use std::path::Path;
use std::time::Duration;

pub fn run(
    root: &Path,
    interval_secs: u64,
    ticks: Option<u64>,
    heartbeat_every: u64,
    inbox: Option<&Path>,
) -> anyhow::Result<()> {
    let candidates = match inbox {
        Some(path) => read_candidates(path)?,
        None => Vec::new(),
    };
    let gov = SharedGovernor::new(super::open_governor(root)?);

    // An interval of 0 ticks as fast as the loop allows.
    let period = if interval_secs == 0 {
        Duration::from_millis(10)
    } else {
        Duration::from_secs(interval_secs)
    };

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    rt.block_on(drive(gov, period, ticks, heartbeat_every, candidates))
}

async fn drive(
    gov: SharedGovernor,
    period: Duration,
    ticks: Option<u64>,
    heartbeat_every: u64,
    candidates: Vec<super::evaluate::CandidateLine>,
) -> anyhow::Result<()> {
    let now = gov.with(|g| g.now()).await;
    let producers: Vec<_> = candidates
        .into_iter()
        .map(|line| {
            let gov = gov.clone();
            let candidate = line.into_candidate(now);
            tokio::spawn(async move {
                match gov.propose(candidate.clone()).await {
                    Ok(decision) => println!(
                        "{} '{}': {}",
                        candidate.class,
                        candidate.target_id,
                        describe_decision(&decision)
                    ),
                    Err(e) => eprintln!(
                        "{} '{}': error: {e}",
                        candidate.class, candidate.target_id
                    ),
                }
            })
        })
        .collect();

    tracing::info!(
        period_ms = period.as_millis() as u64,
        producers = producers.len(),
        "governor loop started"
    );

    let mut interval = tokio::time::interval(period);
    let mut n: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
        n += 1;

        let report = gov.tick().await.context("tick failed")?;
        let admitted = report.admitted().count();
        if admitted > 0 {
            tracing::info!(tick = n, admitted, "tick admitted");
        }
        gov.reconcile().await.context("reconciliation failed")?;

        if heartbeat_every > 0 && n % heartbeat_every == 0 {
            heartbeat(n, &gov.status().await);
        }
        if ticks.is_some_and(|limit| n >= limit) {
            break;
        }
    }

    let waiting = producers.iter().filter(|p| !p.is_finished()).count();
    if waiting > 0 {
        tracing::warn!(waiting, "stopping with undecided proposals");
    }
    for p in producers {
        if p.is_finished() {
            let _ = p.await;
        } else {
            p.abort();
        }
    }
    Ok(())
}

fn heartbeat(tick: u64, status: &GovernorStatus) {
    let usage: Vec<String> = status
        .classes
        .iter()
        .filter_map(|c| {
            let w = c.windows.first()?;
            Some(format!("{}={}/{}", c.class, w.used, w.cap))
        })
        .collect();
    let pending: usize = status.classes.iter().map(|c| c.pending).sum();
    tracing::info!(
        tick,
        account = ?status.account.as_ref().map(|a| a.used),
        pending,
        paused = status.paused,
        usage = %usage.join(" "),
        "heartbeat"
    );
}
