use thiserror::Error;
use uuid::Uuid;

use crate::types::ActionClass;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("not initialized: run 'pacer init'")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("already actioned: {class} on '{target_id}'")]
    AlreadyActioned {
        class: ActionClass,
        target_id: String,
    },

    #[error("ledger entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("invalid transition for entry {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("unknown action class: {0}")]
    UnknownClass(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("tick failed before proposal {0} was decided")]
    TickAborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PacerError>;
