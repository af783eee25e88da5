use crate::output::{describe_decision, print_json};
use anyhow::Context;
use pacer_core::spike::SpikeScore;
use pacer_core::{BreakingOutcome, GovernorConfig, SpikeScorer, SpikeSignal};
use std::path::Path;

pub fn run(
    root: &Path,
    name: String,
    volume: u64,
    window: u32,
    growth: f64,
    propose: bool,
    json: bool,
) -> anyhow::Result<()> {
    let signal = SpikeSignal {
        name,
        volume,
        window_minutes: window,
        growth_factor: growth,
    };

    if !propose {
        let config = GovernorConfig::load(root).context("failed to load config")?;
        let score = SpikeScorer::new(config.spike).score(&signal);
        if json {
            return print_json(&score);
        }
        print_score(&signal, &score);
        return Ok(());
    }

    let mut gov = super::open_governor(root)?;
    let outcome = gov
        .propose_breaking(std::slice::from_ref(&signal), serde_json::Value::Null)
        .context("failed to propose breaking post")?;
    if json {
        return print_json(&outcome);
    }
    match outcome {
        BreakingOutcome::NoSpike { outcome } => println!("no breaking post: {outcome}"),
        BreakingOutcome::Decided {
            signal,
            score,
            decision,
        } => {
            print_score(&signal, &score);
            println!("decision: {}", describe_decision(&decision));
        }
    }
    Ok(())
}

fn print_score(signal: &SpikeSignal, score: &SpikeScore) {
    println!(
        "{}: {} (score {:.1}, urgency {})",
        signal.name,
        if score.is_spike { "SPIKE" } else { "no spike" },
        score.score,
        score.urgency
    );
    for r in &score.rejections {
        println!("  - {r}");
    }
    if score.produce_video {
        println!("  produce video: yes");
    }
}
