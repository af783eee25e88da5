pub mod arbiter;
pub mod budget;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod governor;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod shared;
pub mod spike;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClassPolicy, GovernorConfig};
pub use error::{PacerError, Result};
pub use governor::{BreakingOutcome, Governor, GovernorStatus, ReconcileReport, TickReport};
pub use ledger::{EntryFilter, EntryHandle, LedgerEntry, Outcome};
pub use shared::SharedGovernor;
pub use spike::{SpikeOutcome, SpikeScorer, SpikeSignal};
pub use types::{ActionClass, Candidate, Decision, DeferReason, Proposal, RejectReason};
