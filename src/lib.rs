//! hostwarden: host service health monitor with self-healing recovery
//!
//! ## Architecture
//!
//! - **Runner**: bounded external command execution
//! - **Health**: per-service probes aggregated into a [`health::HealthReport`]
//! - **Control**: idempotent start/stop/restart with verification
//! - **Snapshot**: archive points of the agent state tree, retention, restore
//! - **Self-heal**: the poll, decide, recover loop and its persisted state

pub mod api;
pub mod config;
pub mod control;
pub mod health;
pub mod lockfile;
pub mod notify;
pub mod runner;
pub mod selfheal;
pub mod snapshot;

pub use config::WardenConfig;
pub use health::{HealthReport, HealthVerdict, ProbeResult, ServiceId};
pub use selfheal::SelfHealer;
