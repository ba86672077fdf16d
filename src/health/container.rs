//! Database container probe via the container runtime's `ps` listing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{HealthVerdict, Probe, ProbeResult, ServiceId};
use crate::config::{defaults, ContainerConfig};
use crate::runner::{truncate_chars, CommandRunner, CommandSpec};

pub struct ContainerProbe {
    runner: Arc<dyn CommandRunner>,
    config: ContainerConfig,
}

impl ContainerProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ContainerConfig) -> Self {
        Self { runner, config }
    }
}

/// `<runtime> ps --filter name=<name> --format {{.Names}}\t{{.Status}}`
pub fn ps_command(config: &ContainerConfig) -> CommandSpec {
    CommandSpec::new(
        config.runtime.clone(),
        [
            "ps".to_string(),
            "--filter".to_string(),
            format!("name={}", config.name),
            "--format".to_string(),
            "{{.Names}}\t{{.Status}}".to_string(),
        ],
    )
}

/// Split the first listing line into `(name, status)`.
pub fn parse_ps_line(output: &str) -> Option<(String, String)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    match line.split_once('\t') {
        Some((name, status)) => Some((name.trim().to_string(), status.trim().to_string())),
        None => Some((String::new(), line.to_string())),
    }
}

#[async_trait]
impl Probe for ContainerProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::Container
    }

    fn required(&self) -> bool {
        self.config.required
    }

    async fn check(&self) -> ProbeResult {
        let timeout = Duration::from_secs(defaults::PROBE_TIMEOUT_SECS);
        let verdict_on_failure = HealthVerdict::on_check_failure(self.config.required);

        let output = match self.runner.run(&ps_command(&self.config), timeout).await {
            Ok(output) => output,
            Err(e) => {
                return ProbeResult::new(ServiceId::Container, verdict_on_failure, format!("check skipped: {e}"));
            }
        };

        let Some((name, status)) = parse_ps_line(&output) else {
            let message = if self.config.required {
                format!("container '{}' not running", self.config.name)
            } else {
                format!("container '{}' not present", self.config.name)
            };
            return ProbeResult::new(ServiceId::Container, verdict_on_failure, message);
        };

        let name = if name.is_empty() { self.config.name.clone() } else { name };
        if status.starts_with("Up") {
            ProbeResult::healthy(ServiceId::Container, format!("running ({name}: {status})"))
        } else {
            ProbeResult::unhealthy(
                ServiceId::Container,
                format!("abnormal state ({name}: {})", truncate_chars(&status, 50)),
            )
        }
    }
}
