use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::EntryHandle;

// ---------------------------------------------------------------------------
// ActionClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    OriginalPost,
    Reply,
    BreakingPost,
    Follow,
    Unfollow,
    DirectMessage,
}

impl ActionClass {
    pub fn all() -> &'static [ActionClass] {
        &[
            ActionClass::OriginalPost,
            ActionClass::Reply,
            ActionClass::BreakingPost,
            ActionClass::Follow,
            ActionClass::Unfollow,
            ActionClass::DirectMessage,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionClass::OriginalPost => "original_post",
            ActionClass::Reply => "reply",
            ActionClass::BreakingPost => "breaking_post",
            ActionClass::Follow => "follow",
            ActionClass::Unfollow => "unfollow",
            ActionClass::DirectMessage => "direct_message",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionClass {
    type Err = crate::error::PacerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original_post" | "post" => Ok(ActionClass::OriginalPost),
            "reply" => Ok(ActionClass::Reply),
            "breaking_post" | "breaking" => Ok(ActionClass::BreakingPost),
            "follow" => Ok(ActionClass::Follow),
            "unfollow" => Ok(ActionClass::Unfollow),
            "direct_message" | "dm" => Ok(ActionClass::DirectMessage),
            other => Err(crate::error::PacerError::UnknownClass(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A proposed action. `target_id` is the deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub class: ActionClass,
    pub target_id: String,
    /// Opaque to the governor; handed back to the executor untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub urgency_score: f64,
    pub proposed_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(
        class: ActionClass,
        target_id: impl Into<String>,
        payload: serde_json::Value,
        proposed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            class,
            target_id: target_id.into(),
            payload,
            urgency_score: 0.0,
            proposed_at,
        }
    }

    pub fn with_urgency(mut self, score: f64) -> Self {
        self.urgency_score = score;
        self
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// An active ledger entry (or a same-tick proposal) already covers this target.
    AlreadyActioned,
    /// The class has no policy in the loaded configuration.
    ClassDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    RateExceeded,
    CooldownActive,
    /// Admissions are suspended after repeated executor failures.
    Paused,
    /// Eligible, but another candidate won the tick.
    NotSelected,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeferReason::RateExceeded => "rate_exceeded",
            DeferReason::CooldownActive => "cooldown_active",
            DeferReason::Paused => "paused",
            DeferReason::NotSelected => "not_selected",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::AlreadyActioned => "already_actioned",
            RejectReason::ClassDisabled => "class_disabled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Admit { handle: EntryHandle },
    Defer {
        reason: DeferReason,
        retry_after: DateTime<Utc>,
    },
    Reject { reason: RejectReason },
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }

    pub fn handle(&self) -> Option<&EntryHandle> {
        match self {
            Decision::Admit { handle } => Some(handle),
            _ => None,
        }
    }
}

/// Identifies a candidate waiting in the current tick's ready set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub u64);

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of `Governor::propose`: either settled immediately, or parked for
/// the next `tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Decided(Decision),
    Ready(ProposalId),
}
