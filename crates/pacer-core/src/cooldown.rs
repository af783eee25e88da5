//! Per-class pacing.
//!
//! A class with `min_interval_secs` set may not be admitted before its
//! `next_eligible_at`. Each admission pushes that instant out by the base
//! interval plus a uniform jitter of `±jitter_fraction × interval`.
//!
//! With a `daily_target`, the base interval is recomputed on every firing as
//! the remaining UTC day divided by the remaining target, clamped to
//! `[min_interval, max_interval]`. A slow morning then tightens the cadence
//! instead of leaving the target unmet, and a fast one loosens it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::GovernorConfig;
use crate::types::ActionClass;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownState {
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// UTC day `fired_today` refers to.
    pub day: Option<NaiveDate>,
    #[serde(default)]
    pub fired_today: u32,
}

impl CooldownState {
    fn empty() -> Self {
        Self {
            next_eligible_at: None,
            last_fired_at: None,
            day: None,
            fired_today: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Pacing {
    min_interval: Duration,
    max_interval: Option<Duration>,
    daily_target: Option<u32>,
    jitter_fraction: f64,
}

impl Pacing {
    fn base_interval(&self, fired_today: u32, now: DateTime<Utc>) -> Duration {
        let Some(target) = self.daily_target else {
            return self.min_interval;
        };
        let ceiling = self.max_interval.unwrap_or(self.min_interval);
        let remaining = target.saturating_sub(fired_today);
        if remaining == 0 {
            return ceiling.max(self.min_interval);
        }
        let spread = seconds_left_in_day(now) / i64::from(remaining);
        let spread = Duration::seconds(spread);
        spread.clamp(self.min_interval, ceiling.max(self.min_interval))
    }
}

fn seconds_left_in_day(now: DateTime<Utc>) -> i64 {
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc());
    match next_midnight {
        Some(midnight) => (midnight - now).num_seconds().max(0),
        None => 0,
    }
}

pub struct CooldownScheduler {
    pacing: HashMap<ActionClass, Pacing>,
    states: HashMap<ActionClass, CooldownState>,
    rng: StdRng,
}

impl CooldownScheduler {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &GovernorConfig, rng: StdRng) -> Self {
        let pacing = config
            .classes
            .iter()
            .filter_map(|(class, policy)| {
                let min = policy.min_interval_secs?;
                Some((
                    *class,
                    Pacing {
                        min_interval: Duration::seconds(min as i64),
                        max_interval: policy.max_interval_secs.map(|s| Duration::seconds(s as i64)),
                        daily_target: policy.daily_target,
                        jitter_fraction: policy.jitter_fraction,
                    },
                ))
            })
            .collect();
        Self {
            pacing,
            states: HashMap::new(),
            rng,
        }
    }

    pub fn is_paced(&self, class: ActionClass) -> bool {
        self.pacing.contains_key(&class)
    }

    /// True if `class` may fire at `now`. Unpaced classes are always eligible.
    pub fn eligible(&self, class: ActionClass, now: DateTime<Utc>) -> bool {
        match self.next_eligible_at(class) {
            Some(at) => now >= at,
            None => true,
        }
    }

    pub fn next_eligible_at(&self, class: ActionClass) -> Option<DateTime<Utc>> {
        if !self.is_paced(class) {
            return None;
        }
        self.states.get(&class).and_then(|s| s.next_eligible_at)
    }

    /// Record a firing at `now` and schedule the next eligible instant.
    /// Returns the new state, or `None` for unpaced classes.
    pub fn mark_fired(&mut self, class: ActionClass, now: DateTime<Utc>) -> Option<CooldownState> {
        let pacing = self.pacing.get(&class)?;
        let state = self
            .states
            .entry(class)
            .or_insert_with(CooldownState::empty);

        let today = now.date_naive();
        if state.day != Some(today) {
            state.day = Some(today);
            state.fired_today = 0;
        }
        state.fired_today += 1;

        let base = pacing.base_interval(state.fired_today, now);
        let bound = base.num_milliseconds() as f64 * pacing.jitter_fraction;
        let jitter_ms = if bound > 0.0 {
            self.rng.gen_range(-bound..=bound)
        } else {
            0.0
        };
        let next = now + base + Duration::milliseconds(jitter_ms.round() as i64);

        state.last_fired_at = Some(now);
        state.next_eligible_at = Some(next);
        tracing::debug!(
            class = %class,
            base_secs = base.num_seconds(),
            next = %next,
            fired_today = state.fired_today,
            "cooldown scheduled"
        );
        Some(state.clone())
    }

    pub fn state(&self, class: ActionClass) -> Option<&CooldownState> {
        self.states.get(&class)
    }

    /// Put back the state captured before a `mark_fired` whose admission
    /// could not be recorded.
    pub fn revert(&mut self, class: ActionClass, prior: Option<CooldownState>) {
        match prior {
            Some(state) => {
                self.states.insert(class, state);
            }
            None => {
                self.states.remove(&class);
            }
        }
    }

    pub fn restore(&mut self, states: Vec<(String, CooldownState)>) {
        for (key, state) in states {
            if let Ok(class) = key.parse::<ActionClass>() {
                self.states.insert(class, state);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
