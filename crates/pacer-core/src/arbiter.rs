//! Priority arbiter: picks which ready candidates a tick admits.
//!
//! Candidates are ordered by `(urgency tier, class priority, proposed_at)`
//! ascending. The urgency tier is 0 when `urgency_score` reaches the bypass
//! threshold and 1 otherwise, so an urgent candidate outranks every ordinary
//! one whatever its class priority. Class and target id break the remaining
//! ties, making the result independent of input order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::GovernorConfig;
use crate::types::{ActionClass, Candidate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey<'a> {
    tier: u8,
    priority: i32,
    proposed_at: DateTime<Utc>,
    class: ActionClass,
    target_id: &'a str,
}

pub struct PriorityArbiter {
    urgency_bypass_threshold: f64,
    priorities: BTreeMap<ActionClass, i32>,
}

impl PriorityArbiter {
    pub fn new(urgency_bypass_threshold: f64, priorities: BTreeMap<ActionClass, i32>) -> Self {
        Self {
            urgency_bypass_threshold,
            priorities,
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        let priorities = config
            .classes
            .iter()
            .map(|(class, policy)| (*class, policy.priority))
            .collect();
        Self::new(config.urgency_bypass_threshold, priorities)
    }

    pub fn is_urgent(&self, candidate: &Candidate) -> bool {
        candidate.urgency_score >= self.urgency_bypass_threshold
    }

    fn key<'a>(&self, c: &'a Candidate) -> RankKey<'a> {
        RankKey {
            tier: if self.is_urgent(c) { 0 } else { 1 },
            priority: self.priorities.get(&c.class).copied().unwrap_or(i32::MAX),
            proposed_at: c.proposed_at,
            class: c.class,
            target_id: &c.target_id,
        }
    }

    pub fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }

    /// Best candidate, or `None` for an empty set.
    pub fn select<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        candidates.iter().min_by(|a, b| self.compare(a, b))
    }

    /// Indices into `candidates` in service order.
    pub fn order<'a, I>(&self, candidates: I) -> Vec<usize>
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        let mut keyed: Vec<(usize, RankKey<'a>)> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| (i, self.key(c)))
            .collect();
        keyed.sort_by(|(ia, a), (ib, b)| a.cmp(b).then(ia.cmp(ib)));
        keyed.into_iter().map(|(i, _)| i).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn cand(class: ActionClass, target: &str, offset_secs: i64) -> Candidate {
        Candidate::new(
            class,
            target,
            serde_json::Value::Null,
            t0() + Duration::seconds(offset_secs),
        )
    }

    fn arbiter() -> PriorityArbiter {
        PriorityArbiter::from_config(&GovernorConfig::default())
    }

    #[test]
    fn empty_set_selects_nothing() {
        assert!(arbiter().select(&[]).is_none());
    }

    #[test]
    fn class_priority_then_fifo() {
        let a = arbiter();
        let set = vec![
            cand(ActionClass::Follow, "u1", 0),
            cand(ActionClass::Reply, "t2", 5),
            cand(ActionClass::Reply, "t1", 2),
        ];
        let best = a.select(&set).unwrap();
        assert_eq!(best.target_id, "t1");
        assert_eq!(a.order(&set), vec![2, 1, 0]);
    }

    #[test]
    fn urgency_overrides_class_priority() {
        let a = arbiter();
        let set = vec![
            cand(ActionClass::Reply, "t1", 0),
            cand(ActionClass::DirectMessage, "urgent-dm", 10).with_urgency(95.0),
        ];
        assert_eq!(a.select(&set).unwrap().target_id, "urgent-dm");
    }

    #[test]
    fn below_threshold_urgency_is_ignored() {
        let a = arbiter();
        let set = vec![
            cand(ActionClass::Reply, "t1", 0),
            cand(ActionClass::DirectMessage, "dm", 0).with_urgency(69.9),
        ];
        assert_eq!(a.select(&set).unwrap().target_id, "t1");
    }

    #[test]
    fn nan_urgency_is_not_urgent() {
        let a = arbiter();
        assert!(!a.is_urgent(&cand(ActionClass::Reply, "x", 0).with_urgency(f64::NAN)));
    }

    #[test]
    fn selection_ignores_input_order() {
        let a = arbiter();
        let mut set = vec![
            cand(ActionClass::Reply, "b", 0),
            cand(ActionClass::Reply, "a", 0),
            cand(ActionClass::Follow, "c", 0),
        ];
        let first = a.select(&set).unwrap().clone();
        set.reverse();
        for _ in 0..10 {
            assert_eq!(a.select(&set).unwrap(), &first);
        }
        assert_eq!(first.target_id, "a");
    }
}
