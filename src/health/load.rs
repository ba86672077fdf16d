//! One-minute load average relative to core count.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{HealthVerdict, Probe, ProbeError, ProbeResult, ServiceId};
use crate::config::LoadConfig;
use crate::runner::{CommandRunner, CommandSpec};

const UPTIME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LoadProbe {
    runner: Arc<dyn CommandRunner>,
    config: LoadConfig,
}

impl LoadProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, config: LoadConfig) -> Self {
        Self { runner, config }
    }

    async fn one_minute_load(&self) -> Result<f64, ProbeError> {
        if cfg!(target_os = "linux") {
            let raw = tokio::fs::read_to_string("/proc/loadavg")
                .await
                .map_err(|e| ProbeError::Io(e.to_string()))?;
            parse_loadavg(&raw)
        } else {
            let output = self.runner.run(&CommandSpec::new("uptime", Vec::<String>::new()), UPTIME_TIMEOUT).await?;
            parse_uptime(&output)
        }
    }
}

/// First field of `/proc/loadavg`.
pub fn parse_loadavg(raw: &str) -> Result<f64, ProbeError> {
    raw.split_whitespace()
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| ProbeError::Parse(format!("unexpected /proc/loadavg content: {raw:?}")))
}

/// First number after `load average:` / `load averages:` in `uptime` output.
pub fn parse_uptime(output: &str) -> Result<f64, ProbeError> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"(?i)load averages?:\s*([\d.]+)").ok())
        .as_ref()
        .ok_or_else(|| ProbeError::Parse("load regex unavailable".to_string()))?;
    re.captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| ProbeError::Parse("no load average in uptime output".to_string()))
}

/// Classify a load against per-core ratios. `crit` below `warn` is raised to `warn`.
pub fn classify_load(load: f64, cpus: usize, warn: f64, crit: f64) -> (HealthVerdict, String) {
    let cpus = cpus.max(1);
    let crit = crit.max(warn);
    let ratio = load / cpus as f64;
    let detail = format!("{load:.2} ({cpus} cores, ratio={ratio:.2})");
    if ratio >= crit {
        (HealthVerdict::Unhealthy, format!("overloaded: {detail}"))
    } else if ratio >= warn {
        (HealthVerdict::Healthy, format!("elevated: {detail}"))
    } else {
        (HealthVerdict::Healthy, format!("normal: {detail}"))
    }
}

#[async_trait]
impl Probe for LoadProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::SystemLoad
    }

    fn required(&self) -> bool {
        false
    }

    async fn check(&self) -> ProbeResult {
        match self.one_minute_load().await {
            Ok(load) => {
                let cpus = std::thread::available_parallelism().map_or(1, usize::from);
                let (verdict, message) = classify_load(load, cpus, self.config.warn_ratio, self.config.crit_ratio);
                ProbeResult::new(ServiceId::SystemLoad, verdict, message)
            }
            Err(e) => ProbeResult::unknown(ServiceId::SystemLoad, format!("cannot read load: {e}")),
        }
    }
}
