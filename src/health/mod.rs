//! Health probes: one tri-state check per monitored service
//!
//! Each probe implements [`Probe`] and folds every failure mode it can hit
//! (timeouts, refused connections, missing binaries, garbage output) into a
//! [`ProbeResult`]. A probe never returns an error to its caller; the only
//! decision it makes is whether a failed check means `Unhealthy` (service is
//! mandatory on this host) or `Unknown` (service optional / not configured).
//!
//! [`ProbeSet`] runs all probes of one cycle concurrently, each under a hard
//! timeout, and produces a [`HealthReport`].

pub mod container;
pub mod disk;
pub mod docker_space;
pub mod gateway;
pub mod http;
pub mod load;
pub mod model_server;
mod probe_set;

pub use container::ContainerProbe;
pub use disk::DiskProbe;
pub use docker_space::DockerSpaceProbe;
pub use gateway::GatewayProbe;
pub use http::{HttpCheck, HttpReply, ReqwestCheck};
pub use load::LoadProbe;
pub use model_server::ModelServerProbe;
pub use probe_set::ProbeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::runner::CommandError;

/// Tri-state verdict of one probe.
///
/// `Unknown` means "not applicable on this host" and never counts as a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthVerdict {
    pub const fn is_problem(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Verdict for a check that could not be carried out.
    pub const fn on_check_failure(required: bool) -> Self {
        if required {
            Self::Unhealthy
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Monitored services. Ordering is the report display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceId {
    Gateway,
    ModelServer,
    Container,
    DockerSpace,
    Disk,
    SystemLoad,
}

impl ServiceId {
    pub const ALL: [Self; 6] = [
        Self::Gateway,
        Self::ModelServer,
        Self::Container,
        Self::DockerSpace,
        Self::Disk,
        Self::SystemLoad,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::ModelServer => "model-server",
            Self::Container => "container",
            Self::DockerSpace => "docker-space",
            Self::Disk => "disk",
            Self::SystemLoad => "system-load",
        }
    }

    /// Human label used in rendered reports.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Gateway => "Gateway",
            Self::ModelServer => "Model server",
            Self::Container => "Database container",
            Self::DockerSpace => "Container runtime",
            Self::Disk => "Disk",
            Self::SystemLoad => "System load",
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|id| id.as_str()).collect();
                format!("unknown service '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Outcome of one probe. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub service_id: ServiceId,
    pub verdict: HealthVerdict,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(service_id: ServiceId, verdict: HealthVerdict, message: impl Into<String>) -> Self {
        Self {
            service_id,
            verdict,
            message: message.into(),
            observed_at: Utc::now(),
        }
    }

    pub fn healthy(service_id: ServiceId, message: impl Into<String>) -> Self {
        Self::new(service_id, HealthVerdict::Healthy, message)
    }

    pub fn unhealthy(service_id: ServiceId, message: impl Into<String>) -> Self {
        Self::new(service_id, HealthVerdict::Unhealthy, message)
    }

    pub fn unknown(service_id: ServiceId, message: impl Into<String>) -> Self {
        Self::new(service_id, HealthVerdict::Unknown, message)
    }
}

/// Latest probe result per service for one polling cycle.
///
/// Superseded by the next cycle's report, never merged with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub results: BTreeMap<ServiceId, ProbeResult>,
    pub problem_count: usize,
    pub all_ok: bool,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_results(results: impl IntoIterator<Item = ProbeResult>, generated_at: DateTime<Utc>) -> Self {
        let results: BTreeMap<_, _> = results.into_iter().map(|r| (r.service_id, r)).collect();
        let problem_count = results.values().filter(|r| r.verdict.is_problem()).count();
        Self {
            results,
            problem_count,
            all_ok: problem_count == 0,
            generated_at,
        }
    }

    pub fn verdict(&self, id: ServiceId) -> Option<HealthVerdict> {
        self.results.get(&id).map(|r| r.verdict)
    }

    pub fn problems(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.values().filter(|r| r.verdict.is_problem())
    }

    /// Multi-line human report.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "System status report".to_string(),
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            String::new(),
        ];
        for result in self.results.values() {
            let marker = match result.verdict {
                HealthVerdict::Healthy => "OK  ",
                HealthVerdict::Unhealthy => "FAIL",
                HealthVerdict::Unknown => "N/A ",
            };
            lines.push(format!("[{marker}] {}: {}", result.service_id.label(), result.message));
        }
        lines.push(String::new());
        if self.all_ok {
            lines.push("All services healthy".to_string());
        } else {
            lines.push(format!("{} problem(s) need attention", self.problem_count));
        }
        lines.join("\n")
    }
}

/// Failure of an individual check, before it is folded into a verdict.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("unreadable output: {0}")]
    Parse(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("I/O error: {0}")]
    Io(String),
}

/// A single health check.
///
/// `check` must not panic and must not block the runtime; blocking work goes
/// through `spawn_blocking`. [`ProbeSet`] additionally bounds it with a timeout.
#[async_trait]
pub trait Probe: Send + Sync {
    fn service_id(&self) -> ServiceId;

    /// Whether a check that cannot complete counts as `Unhealthy`.
    fn required(&self) -> bool {
        true
    }

    async fn check(&self) -> ProbeResult;
}
