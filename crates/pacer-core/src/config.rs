use crate::error::{PacerError, Result};
use crate::paths;
use crate::types::ActionClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ClassPolicy
// ---------------------------------------------------------------------------

/// Limits and ordering for one action class. Unset caps mean unlimited;
/// an unset `min_interval_secs` means the class is not paced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_cap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_cap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_secs: Option<u64>,
    /// Upper clamp for daily-target pacing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_secs: Option<u64>,
    /// Number of firings to spread across the UTC day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_target: Option<u32>,
    #[serde(default = "default_jitter")]
    pub jitter_fraction: f64,
    /// Lower is served first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_dedup")]
    pub dedup_scope: bool,
}

fn default_jitter() -> f64 {
    0.1
}

fn default_dedup() -> bool {
    true
}

impl Default for ClassPolicy {
    fn default() -> Self {
        Self {
            hourly_cap: None,
            daily_cap: None,
            min_interval_secs: None,
            max_interval_secs: None,
            daily_target: None,
            jitter_fraction: default_jitter(),
            priority: 0,
            dedup_scope: default_dedup(),
        }
    }
}

// ---------------------------------------------------------------------------
// SpikeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeWeights {
    pub volume: f64,
    pub growth: f64,
    pub recency: f64,
}

impl Default for SpikeWeights {
    fn default() -> Self {
        Self {
            volume: 0.4,
            growth: 0.4,
            recency: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordBoost {
    pub keyword: String,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeConfig {
    #[serde(default = "default_min_volume")]
    pub min_volume: u64,
    #[serde(default = "default_max_window")]
    pub max_window_minutes: u32,
    #[serde(default = "default_min_growth")]
    pub min_growth: f64,
    /// Volume that normalises to 1.0 (log scale).
    #[serde(default = "default_volume_saturation")]
    pub volume_saturation: u64,
    /// Growth factor that normalises to 1.0.
    #[serde(default = "default_growth_saturation")]
    pub growth_saturation: f64,
    #[serde(default)]
    pub weights: SpikeWeights,
    #[serde(default = "default_video_threshold")]
    pub video_production_threshold: f64,
    #[serde(default = "default_keyword_boosts")]
    pub keyword_boosts: Vec<KeywordBoost>,
}

fn default_min_volume() -> u64 {
    10_000
}

fn default_max_window() -> u32 {
    120
}

fn default_min_growth() -> f64 {
    2.0
}

fn default_volume_saturation() -> u64 {
    500_000
}

fn default_growth_saturation() -> f64 {
    5.0
}

fn default_video_threshold() -> f64 {
    80.0
}

fn default_keyword_boosts() -> Vec<KeywordBoost> {
    ["breaking", "urgent", "alert"]
        .into_iter()
        .map(|k| KeywordBoost {
            keyword: k.to_string(),
            multiplier: 1.3,
        })
        .collect()
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            min_volume: default_min_volume(),
            max_window_minutes: default_max_window(),
            min_growth: default_min_growth(),
            volume_saturation: default_volume_saturation(),
            growth_saturation: default_growth_saturation(),
            weights: SpikeWeights::default(),
            video_production_threshold: default_video_threshold(),
            keyword_boosts: default_keyword_boosts(),
        }
    }
}

// ---------------------------------------------------------------------------
// BreakerConfig
// ---------------------------------------------------------------------------

/// Pause every admission after repeated executor failures.
/// A `failure_threshold` of 0 disables the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_pause_minutes")]
    pub pause_minutes: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_pause_minutes() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            pause_minutes: default_pause_minutes(),
        }
    }
}

// ---------------------------------------------------------------------------
// GovernorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Classes absent from this map are disabled.
    #[serde(default = "default_policies")]
    pub classes: BTreeMap<ActionClass, ClassPolicy>,
    #[serde(default = "default_account_cap")]
    pub account_hourly_cap: Option<u32>,
    #[serde(default = "default_urgency_bypass")]
    pub urgency_bypass_threshold: f64,
    #[serde(default = "default_max_admissions")]
    pub max_admissions_per_tick: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_stale_minutes")]
    pub stale_pending_minutes: u32,
    #[serde(default)]
    pub spike: SpikeConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

fn default_version() -> u32 {
    1
}

fn default_account_cap() -> Option<u32> {
    Some(30)
}

fn default_urgency_bypass() -> f64 {
    70.0
}

fn default_max_admissions() -> u32 {
    1
}

fn default_retention_days() -> u32 {
    30
}

fn default_stale_minutes() -> u32 {
    10
}

pub fn default_policies() -> BTreeMap<ActionClass, ClassPolicy> {
    let mut m = BTreeMap::new();
    m.insert(
        ActionClass::OriginalPost,
        ClassPolicy {
            daily_cap: Some(12),
            min_interval_secs: Some(3600),
            max_interval_secs: Some(4 * 3600),
            daily_target: Some(8),
            priority: 2,
            ..ClassPolicy::default()
        },
    );
    m.insert(
        ActionClass::Reply,
        ClassPolicy {
            hourly_cap: Some(15),
            priority: 1,
            ..ClassPolicy::default()
        },
    );
    m.insert(
        ActionClass::BreakingPost,
        ClassPolicy {
            daily_cap: Some(3),
            min_interval_secs: Some(2 * 3600),
            priority: 0,
            ..ClassPolicy::default()
        },
    );
    m.insert(
        ActionClass::Follow,
        ClassPolicy {
            hourly_cap: Some(10),
            daily_cap: Some(50),
            priority: 3,
            ..ClassPolicy::default()
        },
    );
    m.insert(
        ActionClass::Unfollow,
        ClassPolicy {
            hourly_cap: Some(10),
            daily_cap: Some(50),
            priority: 4,
            ..ClassPolicy::default()
        },
    );
    m.insert(
        ActionClass::DirectMessage,
        ClassPolicy {
            hourly_cap: Some(5),
            daily_cap: Some(20),
            min_interval_secs: Some(120),
            priority: 5,
            ..ClassPolicy::default()
        },
    );
    m
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            classes: default_policies(),
            account_hourly_cap: default_account_cap(),
            urgency_bypass_threshold: default_urgency_bypass(),
            max_admissions_per_tick: default_max_admissions(),
            retention_days: default_retention_days(),
            stale_pending_minutes: default_stale_minutes(),
            spike: SpikeConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// No classes enabled and no account cap. Useful as a base for callers
    /// that configure every class explicitly.
    pub fn empty() -> Self {
        Self {
            classes: BTreeMap::new(),
            account_hourly_cap: None,
            ..Self::default()
        }
    }

    /// Set (or replace) the policy for `class`.
    pub fn configure(&mut self, class: ActionClass, policy: ClassPolicy) -> &mut Self {
        self.classes.insert(class, policy);
        self
    }

    pub fn policy(&self, class: ActionClass) -> Option<&ClassPolicy> {
        self.classes.get(&class)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PacerError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: GovernorConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Write the config only if none exists yet. Returns `true` if written.
    pub fn save_if_missing(&self, root: &Path) -> Result<bool> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::write_if_missing(&path, data.as_bytes())
    }

    /// Fail with `ConfigInvalid` listing every error-level problem.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PacerError::ConfigInvalid(errors.join("; ")))
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        for (class, p) in &self.classes {
            if p.hourly_cap == Some(0) {
                error(format!("{class}: hourly_cap is 0, the class could never fire"));
            }
            if p.daily_cap == Some(0) {
                error(format!("{class}: daily_cap is 0, the class could never fire"));
            }
            if let (Some(min), Some(max)) = (p.min_interval_secs, p.max_interval_secs) {
                if min > max {
                    error(format!(
                        "{class}: min_interval_secs ({min}) exceeds max_interval_secs ({max})"
                    ));
                }
            }
            if !(0.0..1.0).contains(&p.jitter_fraction) {
                error(format!(
                    "{class}: jitter_fraction {} must be in [0, 1)",
                    p.jitter_fraction
                ));
            }
            if p.daily_target.is_some() && p.min_interval_secs.is_none() {
                error(format!("{class}: daily_target requires min_interval_secs"));
            }
            if p.daily_target == Some(0) {
                error(format!("{class}: daily_target is 0"));
            }
        }

        if self.account_hourly_cap == Some(0) {
            error("account_hourly_cap is 0, nothing could ever fire".to_string());
        }
        if self.max_admissions_per_tick == 0 {
            error("max_admissions_per_tick must be at least 1".to_string());
        }
        if !self.urgency_bypass_threshold.is_finite() {
            error("urgency_bypass_threshold must be a finite number".to_string());
        }

        let s = &self.spike;
        if s.min_volume == 0 {
            error("spike.min_volume must be positive".to_string());
        }
        if s.max_window_minutes == 0 {
            error("spike.max_window_minutes must be positive".to_string());
        }
        if !(s.min_growth > 0.0) {
            error("spike.min_growth must be positive".to_string());
        }
        if !(s.growth_saturation > 1.0) {
            error("spike.growth_saturation must be greater than 1".to_string());
        }
        if !(0.0..=100.0).contains(&s.video_production_threshold) {
            error("spike.video_production_threshold must be in [0, 100]".to_string());
        }
        let w = &s.weights;
        if w.volume < 0.0 || w.growth < 0.0 || w.recency < 0.0 {
            error("spike.weights must not be negative".to_string());
        } else if w.volume + w.growth + w.recency <= 0.0 {
            error("spike.weights must not all be zero".to_string());
        }
        for boost in &s.keyword_boosts {
            if !(boost.multiplier > 0.0) {
                error(format!(
                    "spike.keyword_boosts: '{}' has non-positive multiplier",
                    boost.keyword
                ));
            }
        }

        // Warning-level checks
        for (class, p) in &self.classes {
            if let (Some(h), Some(d)) = (p.hourly_cap, p.daily_cap) {
                if h > d {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "{class}: hourly_cap ({h}) exceeds daily_cap ({d}), the hourly cap is unreachable"
                        ),
                    });
                }
            }
            if let (Some(t), Some(d)) = (p.daily_target, p.daily_cap) {
                if t > d {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "{class}: daily_target ({t}) exceeds daily_cap ({d})"
                        ),
                    });
                }
            }
        }
        if self.breaker.failure_threshold > 0 && self.breaker.pause_minutes == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "breaker.pause_minutes is 0, failures will never pause admissions"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn errors(cfg: &GovernorConfig) -> Vec<String> {
        cfg.validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = GovernorConfig::default();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.classes.len(), ActionClass::all().len());
        assert!(cfg.classes.values().all(|p| p.dedup_scope));
    }

    #[test]
    fn default_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cfg = GovernorConfig::default();
        cfg.save(dir.path()).unwrap();
        let loaded = GovernorConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let err = GovernorConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, PacerError::NotInitialized));
    }

    #[test]
    fn sparse_yaml_fills_defaults() {
        let yaml = r#"
classes:
  reply:
    hourly_cap: 8
"#;
        let cfg: GovernorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.classes.len(), 1);
        let reply = cfg.policy(ActionClass::Reply).unwrap();
        assert_eq!(reply.hourly_cap, Some(8));
        assert_eq!(reply.jitter_fraction, 0.1);
        assert!(reply.dedup_scope);
        assert_eq!(cfg.account_hourly_cap, Some(30));
        assert_eq!(cfg.stale_pending_minutes, 10);
        assert_eq!(cfg.spike.video_production_threshold, 80.0);
    }

    #[test]
    fn zero_cap_is_an_error() {
        let mut cfg = GovernorConfig::empty();
        cfg.configure(
            ActionClass::Follow,
            ClassPolicy {
                daily_cap: Some(0),
                dedup_scope: false,
                ..ClassPolicy::default()
            },
        );
        let errs = errors(&cfg);
        assert!(errs.iter().any(|m| m.contains("daily_cap is 0")), "{errs:?}");
        assert!(matches!(cfg.ensure_valid(), Err(PacerError::ConfigInvalid(_))));
    }

    #[test]
    fn interval_and_jitter_checks() {
        let mut cfg = GovernorConfig::empty();
        cfg.configure(
            ActionClass::OriginalPost,
            ClassPolicy {
                min_interval_secs: Some(7200),
                max_interval_secs: Some(3600),
                jitter_fraction: 1.5,
                ..ClassPolicy::default()
            },
        );
        let errs = errors(&cfg);
        assert!(errs.iter().any(|m| m.contains("exceeds max_interval_secs")));
        assert!(errs.iter().any(|m| m.contains("jitter_fraction")));
    }

    #[test]
    fn daily_target_needs_min_interval() {
        let mut cfg = GovernorConfig::empty();
        cfg.configure(
            ActionClass::OriginalPost,
            ClassPolicy {
                daily_target: Some(6),
                ..ClassPolicy::default()
            },
        );
        assert!(errors(&cfg)
            .iter()
            .any(|m| m.contains("daily_target requires min_interval_secs")));
    }

    #[test]
    fn spike_thresholds_must_be_positive() {
        let mut cfg = GovernorConfig::empty();
        cfg.spike.min_growth = 0.0;
        cfg.spike.min_volume = 0;
        let errs = errors(&cfg);
        assert!(errs.iter().any(|m| m.contains("min_growth")));
        assert!(errs.iter().any(|m| m.contains("min_volume")));
    }

    #[test]
    fn unreachable_hourly_cap_is_a_warning() {
        let mut cfg = GovernorConfig::empty();
        cfg.configure(
            ActionClass::Follow,
            ClassPolicy {
                hourly_cap: Some(60),
                daily_cap: Some(50),
                ..ClassPolicy::default()
            },
        );
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("unreachable")));
        assert!(cfg.ensure_valid().is_ok());
    }

    #[test]
    fn zero_admissions_per_tick_is_an_error() {
        let mut cfg = GovernorConfig::empty();
        cfg.max_admissions_per_tick = 0;
        assert!(errors(&cfg)
            .iter()
            .any(|m| m.contains("max_admissions_per_tick")));
    }
}
