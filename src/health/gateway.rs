//! Gateway probe: CLI status query first, TCP connect as the fallback.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::{Probe, ProbeResult, ServiceId};
use crate::config::{defaults, GatewayConfig};
use crate::runner::{CommandRunner, CommandSpec};

/// What the gateway CLI status output says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    Listening,
    Running,
    Stopped,
    Inconclusive,
}

impl StatusSignal {
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Listening | Self::Running)
    }
}

/// Classify CLI status output by whole-word tokens.
///
/// Whole words matter: `inactive` must not read as `active`. A stop token
/// wins over an up token (`Active: inactive (dead)`).
pub fn parse_status_output(output: &str) -> StatusSignal {
    let lower = output.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |token: &str| words.contains(&token);

    if has("stopped") || has("inactive") || has("dead") || lower.contains("not loaded") {
        StatusSignal::Stopped
    } else if has("listening") {
        StatusSignal::Listening
    } else if has("running") || has("active") {
        StatusSignal::Running
    } else {
        StatusSignal::Inconclusive
    }
}

/// CLI `status` command for the gateway.
pub fn status_command(config: &GatewayConfig) -> Option<CommandSpec> {
    CommandSpec::from_argv(&config.cli).map(|spec| spec.with_args(["status"]))
}

/// TCP connect to `host:port` within `timeout`.
pub async fn port_reachable(host: &str, port: u16, timeout: Duration) -> Result<(), String> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {timeout:?}")),
    }
}

/// Split one probe budget into (CLI status timeout, TCP connect timeout).
///
/// The two together stay under `budget`, so the port fallback still runs
/// when the CLI hangs for its full timeout.
pub fn split_budget(budget: Duration) -> (Duration, Duration) {
    let connect = Duration::from_secs(defaults::GATEWAY_CONNECT_TIMEOUT_SECS).min(budget / 3);
    let slack = budget / 10;
    let status = Duration::from_secs(defaults::GATEWAY_STATUS_TIMEOUT_SECS).min(budget.saturating_sub(connect + slack));
    (status, connect)
}

pub struct GatewayProbe {
    runner: Arc<dyn CommandRunner>,
    config: GatewayConfig,
    status_timeout: Duration,
    connect_timeout: Duration,
}

impl GatewayProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, config: GatewayConfig) -> Self {
        Self::with_budget(runner, config, Duration::from_secs(defaults::PROBE_TIMEOUT_SECS))
    }

    /// Probe whose CLI query and port fallback both fit inside `budget`.
    pub fn with_budget(runner: Arc<dyn CommandRunner>, config: GatewayConfig, budget: Duration) -> Self {
        let (status_timeout, connect_timeout) = split_budget(budget);
        Self {
            runner,
            config,
            status_timeout,
            connect_timeout,
        }
    }

    async fn check_port(&self) -> ProbeResult {
        match port_reachable(&self.config.host, self.config.port, self.connect_timeout).await {
            Ok(()) => ProbeResult::healthy(
                ServiceId::Gateway,
                format!("port {} accepts connections", self.config.port),
            ),
            Err(e) => ProbeResult::unhealthy(
                ServiceId::Gateway,
                format!("port {} not answering ({e})", self.config.port),
            ),
        }
    }
}

#[async_trait]
impl Probe for GatewayProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::Gateway
    }

    async fn check(&self) -> ProbeResult {
        let Some(spec) = status_command(&self.config) else {
            return self.check_port().await;
        };
        match self.runner.run(&spec, self.status_timeout).await {
            Ok(output) => match parse_status_output(&output) {
                StatusSignal::Listening => {
                    ProbeResult::healthy(ServiceId::Gateway, "listening on its port")
                }
                StatusSignal::Running => ProbeResult::healthy(ServiceId::Gateway, "service running"),
                StatusSignal::Stopped => ProbeResult::unhealthy(ServiceId::Gateway, "service stopped"),
                StatusSignal::Inconclusive => {
                    debug!("Gateway status output inconclusive, falling back to port check");
                    self.check_port().await
                }
            },
            Err(e) => {
                debug!(error = %e, "Gateway status command failed, falling back to port check");
                self.check_port().await
            }
        }
    }
}
