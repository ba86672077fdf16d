use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    ContainerProbe, DiskProbe, DockerSpaceProbe, GatewayProbe, HealthReport, HealthVerdict, HttpCheck, LoadProbe,
    ModelServerProbe, Probe, ProbeResult, ServiceId,
};
use crate::config::WardenConfig;
use crate::runner::CommandRunner;

/// All probes of one host, run concurrently per cycle.
#[derive(Clone)]
pub struct ProbeSet {
    probes: Vec<Arc<dyn Probe>>,
    timeout: Duration,
}

impl ProbeSet {
    pub fn new(probes: Vec<Arc<dyn Probe>>, timeout: Duration) -> Self {
        Self { probes, timeout }
    }

    /// Standard probe line-up for a configured host.
    pub fn from_config(config: &WardenConfig, runner: Arc<dyn CommandRunner>, http: Arc<dyn HttpCheck>) -> Self {
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(GatewayProbe::with_budget(
                runner.clone(),
                config.gateway.clone(),
                config.monitor.probe_timeout(),
            )),
            Arc::new(ModelServerProbe::new(http, config.model_server.health_url.clone())),
            Arc::new(ContainerProbe::new(runner.clone(), config.container.clone())),
            Arc::new(DockerSpaceProbe::new(runner.clone(), &config.container)),
            Arc::new(DiskProbe::new(config.disk.clone())),
            Arc::new(LoadProbe::new(runner, config.load.clone())),
        ];
        Self::new(probes, config.monitor.probe_timeout())
    }

    /// The probe registered for `id`, if any.
    pub fn probe(&self, id: ServiceId) -> Option<Arc<dyn Probe>> {
        self.probes.iter().find(|p| p.service_id() == id).cloned()
    }

    /// Run a single probe under the set's timeout.
    pub async fn check_one(&self, id: ServiceId) -> Option<ProbeResult> {
        let probe = self.probe(id)?;
        Some(bounded_check(probe, self.timeout).await)
    }

    /// Run every probe concurrently and fold the results into one report.
    pub async fn run(&self, now: DateTime<Utc>) -> HealthReport {
        let results = join_all(self.probes.iter().map(|p| bounded_check(p.clone(), self.timeout))).await;
        let report = HealthReport::from_results(results, now);
        debug!(problems = report.problem_count, "Health cycle complete");
        report
    }
}

async fn bounded_check(probe: Arc<dyn Probe>, timeout: Duration) -> ProbeResult {
    let id = probe.service_id();
    match tokio::time::timeout(timeout, probe.check()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(service = %id, timeout_secs = timeout.as_secs(), "Probe timed out");
            ProbeResult::new(
                id,
                HealthVerdict::on_check_failure(probe.required()),
                format!("check timed out after {}s", timeout.as_secs()),
            )
        }
    }
}
