use crate::output::{describe_decision, print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use pacer_core::{ActionClass, Candidate, Proposal};
use serde::Deserialize;
use std::path::Path;

/// One JSONL line. `proposed_at` defaults to the time of reading.
#[derive(Debug, Deserialize)]
pub struct CandidateLine {
    pub class: ActionClass,
    pub target_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub urgency_score: f64,
    #[serde(default)]
    pub proposed_at: Option<DateTime<Utc>>,
}

impl CandidateLine {
    pub fn into_candidate(self, now: DateTime<Utc>) -> Candidate {
        Candidate::new(
            self.class,
            self.target_id,
            self.payload,
            self.proposed_at.unwrap_or(now),
        )
        .with_urgency(self.urgency_score)
    }
}

/// Parse non-blank lines of a JSONL file.
pub fn read_candidates(path: &Path) -> anyhow::Result<Vec<CandidateLine>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid candidate", path.display(), n + 1))
        })
        .collect()
}

pub fn run(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let lines = read_candidates(file)?;
    let mut gov = super::open_governor(root)?;
    let now = gov.now();

    let mut immediate = Vec::new();
    for line in lines {
        let candidate = line.into_candidate(now);
        match gov.propose(candidate.clone())? {
            Proposal::Decided(decision) => immediate.push((candidate, decision)),
            Proposal::Ready(_) => {}
        }
    }
    let report = gov.tick().context("tick failed")?;

    let mut results: Vec<(Candidate, pacer_core::Decision)> = immediate;
    results.extend(
        report
            .decisions
            .into_iter()
            .map(|d| (d.candidate, d.decision)),
    );

    if json {
        let value: Vec<serde_json::Value> = results
            .iter()
            .map(|(c, d)| {
                serde_json::json!({
                    "class": c.class,
                    "target_id": c.target_id,
                    "decision": d,
                })
            })
            .collect();
        return print_json(&value);
    }

    let rows = results
        .iter()
        .map(|(c, d)| {
            vec![
                c.class.to_string(),
                c.target_id.clone(),
                describe_decision(d),
            ]
        })
        .collect();
    print_table(&["CLASS", "TARGET", "DECISION"], rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_lines_and_skips_blanks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.jsonl");
        std::fs::write(
            &path,
            "{\"class\":\"reply\",\"target_id\":\"t1\"}\n\n{\"class\":\"follow\",\"target_id\":\"u1\",\"urgency_score\":5}\n",
        )
        .unwrap();
        let lines = read_candidates(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].class, ActionClass::Follow);
        assert_eq!(lines[1].urgency_score, 5.0);
    }

    #[test]
    fn bad_line_reports_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.jsonl");
        std::fs::write(&path, "{\"class\":\"reply\",\"target_id\":\"t1\"}\nnot json\n").unwrap();
        let err = read_candidates(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }
}
