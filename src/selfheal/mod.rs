//! Self-Heal Orchestrator: decides when automatic recovery is warranted
//!
//! Each cycle: load [`SelfHealState`], run the probe set, update the gateway
//! down timer, [`decide`] whether to recover, optionally run one recovery
//! (pre-heal snapshot, restore of the newest point, gateway restart), persist
//! the state and write the status file.

mod healer;
mod policy;
mod state;
mod status;

pub use healer::{CycleOutcome, HealOutcome, SelfHealer};
pub use policy::{decide, BlockReason, Decision, HealPolicy};
pub use state::{SelfHealState, StateError, StateStore};
pub use status::{HealStatus, SelfHealSection, SharedStatus, StatusDocument};
