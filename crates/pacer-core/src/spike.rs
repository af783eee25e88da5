//! Breaking-content spike detection and scoring.
//!
//! A signal is a spike only when volume, window and growth all clear their
//! thresholds. The score is a weighted blend of normalised volume (log
//! scale), growth and recency, multiplied by any keyword boost and clamped
//! to `[0, 100]`. The scorer never picks a default when nothing qualifies:
//! callers get `SpikeOutcome::NoSignals` or `NoneQualified` with the reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SpikeConfig;

/// Trend observation, consumed within one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeSignal {
    pub name: String,
    pub volume: u64,
    pub window_minutes: u32,
    pub growth_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Medium,
    High,
    Extreme,
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Extreme => "extreme",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpikeRejection {
    VolumeBelowMin { volume: u64, min: u64 },
    WindowTooWide { window_minutes: u32, max: u32 },
    GrowthBelowMin { growth_factor: f64, min: f64 },
}

impl fmt::Display for SpikeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpikeRejection::VolumeBelowMin { volume, min } => {
                write!(f, "volume {volume} < {min}")
            }
            SpikeRejection::WindowTooWide {
                window_minutes,
                max,
            } => write!(f, "window {window_minutes}m > {max}m"),
            SpikeRejection::GrowthBelowMin { growth_factor, min } => {
                write!(f, "growth {growth_factor:.2} < {min:.2}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeScore {
    pub is_spike: bool,
    pub score: f64,
    pub urgency: UrgencyLevel,
    /// Hint for the content producer: build the richer artifact (video).
    pub produce_video: bool,
    pub rejections: Vec<SpikeRejection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpikeOutcome {
    /// The signal list was empty.
    NoSignals,
    /// Signals were present but none crossed all thresholds.
    NoneQualified {
        evaluated: usize,
        rejections: Vec<(String, Vec<SpikeRejection>)>,
    },
    Spike {
        signal: SpikeSignal,
        score: SpikeScore,
        /// Other qualifying signals that scored lower.
        runners_up: usize,
    },
}

impl fmt::Display for SpikeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpikeOutcome::NoSignals => f.write_str("no trend signals supplied"),
            SpikeOutcome::NoneQualified {
                evaluated,
                rejections,
            } => {
                write!(f, "no spike among {evaluated} signal(s)")?;
                for (name, reasons) in rejections {
                    let reasons: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
                    write!(f, "; {name}: {}", reasons.join(", "))?;
                }
                Ok(())
            }
            SpikeOutcome::Spike { signal, score, .. } => write!(
                f,
                "spike '{}' score={:.1} urgency={}",
                signal.name, score.score, score.urgency
            ),
        }
    }
}

pub struct SpikeScorer {
    config: SpikeConfig,
}

impl SpikeScorer {
    pub fn new(config: SpikeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpikeConfig {
        &self.config
    }

    pub fn score(&self, signal: &SpikeSignal) -> SpikeScore {
        let cfg = &self.config;

        let mut rejections = Vec::new();
        if signal.volume < cfg.min_volume {
            rejections.push(SpikeRejection::VolumeBelowMin {
                volume: signal.volume,
                min: cfg.min_volume,
            });
        }
        if signal.window_minutes > cfg.max_window_minutes {
            rejections.push(SpikeRejection::WindowTooWide {
                window_minutes: signal.window_minutes,
                max: cfg.max_window_minutes,
            });
        }
        // NaN growth fails the comparison and is rejected here too.
        if !(signal.growth_factor >= cfg.min_growth) {
            rejections.push(SpikeRejection::GrowthBelowMin {
                growth_factor: signal.growth_factor,
                min: cfg.min_growth,
            });
        }
        let is_spike = rejections.is_empty();

        let volume_norm = if cfg.volume_saturation > 0 {
            ((signal.volume as f64).ln_1p() / (cfg.volume_saturation as f64).ln_1p()).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let growth_norm = if cfg.growth_saturation > 1.0 && signal.growth_factor.is_finite() {
            ((signal.growth_factor - 1.0) / (cfg.growth_saturation - 1.0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let recency_norm = if cfg.max_window_minutes > 0 {
            (1.0 - f64::from(signal.window_minutes) / f64::from(cfg.max_window_minutes))
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        let w = &cfg.weights;
        let total = w.volume + w.growth + w.recency;
        let blended = if total > 0.0 {
            (w.volume * volume_norm + w.growth * growth_norm + w.recency * recency_norm) / total
        } else {
            0.0
        };

        let name = signal.name.to_lowercase();
        let boost = cfg
            .keyword_boosts
            .iter()
            .filter(|k| !k.keyword.is_empty() && name.contains(&k.keyword.to_lowercase()))
            .map(|k| k.multiplier)
            .fold(1.0_f64, f64::max);

        let score = (blended * 100.0 * boost).clamp(0.0, 100.0);

        let mut urgency = if signal.window_minutes <= 30 {
            UrgencyLevel::Extreme
        } else if signal.window_minutes <= 60 {
            UrgencyLevel::High
        } else {
            UrgencyLevel::Medium
        };
        if boost > 1.0 && urgency == UrgencyLevel::Medium {
            urgency = UrgencyLevel::High;
        }

        SpikeScore {
            is_spike,
            score,
            urgency,
            produce_video: is_spike && score >= cfg.video_production_threshold,
            rejections,
        }
    }

    /// Score every signal and pick the strongest spike. Ties go to the
    /// lexicographically smaller name so the choice is stable.
    pub fn evaluate(&self, signals: &[SpikeSignal]) -> SpikeOutcome {
        if signals.is_empty() {
            return SpikeOutcome::NoSignals;
        }

        let mut qualified: Vec<(&SpikeSignal, SpikeScore)> = Vec::new();
        let mut rejections = Vec::new();
        for signal in signals {
            let scored = self.score(signal);
            if scored.is_spike {
                qualified.push((signal, scored));
            } else {
                rejections.push((signal.name.clone(), scored.rejections));
            }
        }

        if qualified.is_empty() {
            return SpikeOutcome::NoneQualified {
                evaluated: signals.len(),
                rejections,
            };
        }

        qualified.sort_by(|(a, sa), (b, sb)| {
            sb.score
                .total_cmp(&sa.score)
                .then_with(|| a.name.cmp(&b.name))
        });
        let runners_up = qualified.len() - 1;
        let (signal, score) = qualified.swap_remove(0);
        SpikeOutcome::Spike {
            signal: signal.clone(),
            score,
            runners_up,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordBoost;

    fn scorer() -> SpikeScorer {
        SpikeScorer::new(SpikeConfig {
            keyword_boosts: vec![KeywordBoost {
                keyword: "breaking".into(),
                multiplier: 1.4,
            }],
            ..SpikeConfig::default()
        })
    }

    fn signal(name: &str, volume: u64, window: u32, growth: f64) -> SpikeSignal {
        SpikeSignal {
            name: name.into(),
            volume,
            window_minutes: window,
            growth_factor: growth,
        }
    }

    #[test]
    fn all_three_thresholds_required() {
        let s = scorer();
        assert!(s.score(&signal("a", 50_000, 30, 3.0)).is_spike);

        let slow = s.score(&signal("huge-but-slow", 5_000_000, 30, 1.1));
        assert!(!slow.is_spike);
        assert_eq!(slow.rejections.len(), 1);

        let wide = s.score(&signal("wide", 50_000, 600, 3.0));
        assert!(!wide.is_spike);

        let small = s.score(&signal("small", 10, 30, 3.0));
        assert!(!small.is_spike);
    }

    #[test]
    fn rejections_list_every_failed_threshold() {
        let scored = scorer().score(&signal("nothing", 1, 10_000, 0.5));
        assert_eq!(scored.rejections.len(), 3);
    }

    #[test]
    fn nan_growth_is_not_a_spike() {
        let scored = scorer().score(&signal("nan", 50_000, 30, f64::NAN));
        assert!(!scored.is_spike);
        assert!(scored.score.is_finite());
    }

    #[test]
    fn score_is_clamped() {
        let scored = scorer().score(&signal("breaking max", u64::MAX, 0, 1e9));
        assert!(scored.score <= 100.0);
        assert!(scored.produce_video);
        assert_eq!(scored.urgency, UrgencyLevel::Extreme);
    }

    #[test]
    fn keyword_boost_raises_score_and_urgency() {
        let s = scorer();
        let plain = s.score(&signal("election", 40_000, 90, 2.5));
        let boosted = s.score(&signal("BREAKING election", 40_000, 90, 2.5));
        assert!(boosted.score > plain.score);
        assert_eq!(plain.urgency, UrgencyLevel::Medium);
        assert_eq!(boosted.urgency, UrgencyLevel::High);
    }

    #[test]
    fn evaluate_distinguishes_empty_from_unqualified() {
        let s = scorer();
        assert_eq!(s.evaluate(&[]), SpikeOutcome::NoSignals);
        match s.evaluate(&[signal("quiet", 100, 30, 1.0)]) {
            SpikeOutcome::NoneQualified {
                evaluated,
                rejections,
            } => {
                assert_eq!(evaluated, 1);
                assert_eq!(rejections[0].0, "quiet");
            }
            other => panic!("expected NoneQualified, got {other:?}"),
        }
    }

    #[test]
    fn evaluate_picks_highest_score() {
        let s = scorer();
        let outcome = s.evaluate(&[
            signal("medium", 20_000, 90, 2.1),
            signal("hot", 150_000, 15, 4.5),
            signal("dud", 10, 15, 4.5),
        ]);
        match outcome {
            SpikeOutcome::Spike {
                signal, runners_up, ..
            } => {
                assert_eq!(signal.name, "hot");
                assert_eq!(runners_up, 1);
            }
            other => panic!("expected Spike, got {other:?}"),
        }
    }

    #[test]
    fn outcome_display_explains_rejections() {
        let text = scorer()
            .evaluate(&[signal("slow", 50_000, 30, 1.0)])
            .to_string();
        assert!(text.contains("slow"), "{text}");
        assert!(text.contains("growth"), "{text}");
    }
}
