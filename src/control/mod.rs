//! Control Operations: idempotent lifecycle actions with verification
//!
//! Every action follows the same shape: issue the lifecycle command, wait a
//! settle delay, then re-probe a bounded number of times. When the probe
//! cannot confirm the end state but the command itself succeeded, the action
//! still reports success with an explicit caveat instead of failing the
//! recovery that depends on it.

mod cleanup;
mod service;

pub use cleanup::{cleanup_containers, parse_reclaimed_mb, CleanupReport};
pub use service::{ServiceController, ServiceManager};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::ControlConfig;
use crate::health::ServiceId;
use crate::runner::CommandError;

/// Lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        })
    }
}

/// How sure a successful action is about the resulting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// The service was already in the requested state; nothing was run.
    AlreadyInState,
    /// A re-probe observed the expected state.
    Confirmed,
    /// The probe was ambiguous but the direct health endpoint answered.
    HealthEndpoint,
    /// The command succeeded but nothing confirmed the end state.
    Unconfirmed,
}

/// Outcome of a successful control action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReport {
    pub service: ServiceId,
    pub action: ControlAction,
    pub verification: Verification,
    pub message: String,
}

impl ControlReport {
    pub fn new(service: ServiceId, action: ControlAction, verification: Verification, message: impl Into<String>) -> Self {
        Self {
            service,
            action,
            verification,
            message: message.into(),
        }
    }

    /// False when the message carries a "check later" caveat.
    pub const fn is_certain(&self) -> bool {
        !matches!(self.verification, Verification::Unconfirmed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{service} {action} failed: {source}")]
    Command {
        service: ServiceId,
        action: ControlAction,
        #[source]
        source: CommandError,
    },
    #[error("container '{0}' does not exist and must be recreated")]
    ContainerMissing(String),
    #[error("{action} is not supported for {service}")]
    Unsupported { service: ServiceId, action: ControlAction },
    #[error("{service} {action} failed: {detail}")]
    Failed {
        service: ServiceId,
        action: ControlAction,
        detail: String,
    },
}

/// Lifecycle operations on one of the controllable services.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Start `service`; a service that is already healthy is left untouched.
    async fn start(&self, service: ServiceId) -> Result<ControlReport, ControlError>;

    async fn stop(&self, service: ServiceId) -> Result<ControlReport, ControlError>;

    /// Stop (best-effort), pause, start, verify.
    async fn restart(&self, service: ServiceId) -> Result<ControlReport, ControlError>;
}

/// Delays and retry bounds for control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlTiming {
    pub command_timeout: Duration,
    pub start_settle: Duration,
    pub stop_settle: Duration,
    pub verify_attempts: u32,
    pub verify_spacing: Duration,
    pub restart_gap: Duration,
}

impl ControlTiming {
    /// No waiting at all; the attempt count is kept.
    pub const fn immediate(verify_attempts: u32) -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            start_settle: Duration::ZERO,
            stop_settle: Duration::ZERO,
            verify_attempts,
            verify_spacing: Duration::ZERO,
            restart_gap: Duration::ZERO,
        }
    }
}

impl From<&ControlConfig> for ControlTiming {
    fn from(c: &ControlConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(c.command_timeout_secs),
            start_settle: Duration::from_secs(c.start_settle_secs),
            stop_settle: Duration::from_secs(c.stop_settle_secs),
            verify_attempts: c.verify_attempts.max(1),
            verify_spacing: Duration::from_secs(c.verify_spacing_secs),
            restart_gap: Duration::from_secs(c.restart_gap_secs),
        }
    }
}
