//! Container-runtime disk usage (`docker system df`).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{HealthVerdict, Probe, ProbeResult, ServiceId};
use crate::config::{defaults, ContainerConfig};
use crate::runner::{CommandRunner, CommandSpec};

pub struct DockerSpaceProbe {
    runner: Arc<dyn CommandRunner>,
    runtime: String,
    required: bool,
}

impl DockerSpaceProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &ContainerConfig) -> Self {
        Self {
            runner,
            runtime: config.runtime.clone(),
            required: config.space_required,
        }
    }
}

/// Size column of the `Images` row.
pub fn images_size(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| l.trim_start().to_ascii_lowercase().starts_with("images"))
        .and_then(|l| l.split_whitespace().nth(3))
        .map(str::to_string)
}

#[async_trait]
impl Probe for DockerSpaceProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::DockerSpace
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn check(&self) -> ProbeResult {
        let spec = CommandSpec::new(self.runtime.clone(), ["system", "df"]);
        let timeout = Duration::from_secs(defaults::PROBE_TIMEOUT_SECS);
        match self.runner.run(&spec, timeout).await {
            Ok(output) => match images_size(&output) {
                Some(size) => ProbeResult::healthy(ServiceId::DockerSpace, format!("images use {size}")),
                None => ProbeResult::healthy(ServiceId::DockerSpace, "runtime normal"),
            },
            Err(e) => ProbeResult::new(
                ServiceId::DockerSpace,
                HealthVerdict::on_check_failure(self.required),
                format!("space check skipped: {e}"),
            ),
        }
    }
}
