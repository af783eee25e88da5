use crate::output::{describe_decision, print_json};
use anyhow::Context;
use pacer_core::{Candidate, Decision};
use std::path::Path;

pub fn run(
    root: &Path,
    class: &str,
    target: &str,
    urgency: f64,
    payload: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let class = super::parse_class(class)?;
    let payload = match payload {
        Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let mut gov = super::open_governor(root)?;
    let candidate = Candidate::new(class, target, payload, gov.now()).with_urgency(urgency);
    let decision = gov.evaluate(candidate).context("failed to evaluate candidate")?;

    if json {
        return print_json(&decision);
    }
    println!("{}", describe_decision(&decision));
    if let Decision::Admit { handle } = &decision {
        println!(
            "run the action, then: pacer commit {} (or pacer abandon {})",
            handle.id, handle.id
        );
    }
    Ok(())
}
