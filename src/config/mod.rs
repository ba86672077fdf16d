//! Warden Configuration Module
//!
//! Host-level configuration loaded from a TOML file and then overridden by
//! environment variables.
//!
//! ## Loading Order
//!
//! 1. Explicit path (`--config`)
//! 2. `HOSTWARDEN_CONFIG` environment variable (path to TOML file)
//! 3. `hostwarden.toml` in the current working directory
//! 4. Built-in defaults
//!
//! Environment overrides (`SEEKDB_REQUIRED`, `SELF_HEAL_DOWN_MINUTES`, ...)
//! are applied on top of whichever source won. The resulting value is
//! immutable and passed explicitly to the components that need it.

mod warden_config;
pub mod defaults;
pub mod validation;

pub use warden_config::*;
