use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ControlAction, ControlError, ControlReport, ControlTiming, ServiceControl, Verification};
use crate::config::{defaults, ContainerConfig, GatewayConfig, ModelServerConfig, WardenConfig};
use crate::health::{HealthVerdict, HttpCheck, ProbeSet, ServiceId};
use crate::runner::{CommandError, CommandRunner, CommandSpec};

/// How the model server is managed on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    Systemd,
    Launchd,
}

impl ServiceManager {
    pub const fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::Launchd
        } else {
            Self::Systemd
        }
    }
}

/// [`ServiceControl`] for the gateway, the model server and the database container.
pub struct ServiceController {
    runner: Arc<dyn CommandRunner>,
    http: Arc<dyn HttpCheck>,
    probes: ProbeSet,
    gateway: GatewayConfig,
    model_server: ModelServerConfig,
    container: ContainerConfig,
    timing: ControlTiming,
    manager: ServiceManager,
}

impl ServiceController {
    pub fn new(config: &WardenConfig, runner: Arc<dyn CommandRunner>, http: Arc<dyn HttpCheck>, probes: ProbeSet) -> Self {
        Self {
            runner,
            http,
            probes,
            gateway: config.gateway.clone(),
            model_server: config.model_server.clone(),
            container: config.container.clone(),
            timing: ControlTiming::from(&config.control),
            manager: ServiceManager::detect(),
        }
    }

    #[must_use]
    pub const fn with_timing(mut self, timing: ControlTiming) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub const fn with_service_manager(mut self, manager: ServiceManager) -> Self {
        self.manager = manager;
        self
    }

    async fn verdict(&self, service: ServiceId) -> Option<HealthVerdict> {
        self.probes.check_one(service).await.map(|r| r.verdict)
    }

    async fn run(&self, spec: &CommandSpec) -> Result<String, CommandError> {
        debug!(command = %spec, "Control command");
        self.runner.run(spec, self.timing.command_timeout).await
    }

    fn gateway_command(&self, verb: &str) -> Result<CommandSpec, ControlError> {
        CommandSpec::from_argv(&self.gateway.cli)
            .map(|spec| spec.with_args([verb]))
            .ok_or_else(|| ControlError::Failed {
                service: ServiceId::Gateway,
                action: ControlAction::Start,
                detail: "gateway.cli is empty".to_string(),
            })
    }

    fn runtime_command(&self, verb: &str) -> CommandSpec {
        CommandSpec::new(self.container.runtime.clone(), [verb, self.container.name.as_str()])
    }

    async fn ensure_container_exists(&self) -> Result<(), ControlError> {
        let spec = CommandSpec::new(
            self.container.runtime.clone(),
            [
                "ps".to_string(),
                "-a".to_string(),
                "--filter".to_string(),
                format!("name={}", self.container.name),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ],
        );
        let output = self.run(&spec).await.map_err(|source| ControlError::Command {
            service: ServiceId::Container,
            action: ControlAction::Start,
            source,
        })?;
        if output.lines().any(|l| l.trim() == self.container.name) {
            Ok(())
        } else {
            Err(ControlError::ContainerMissing(self.container.name.clone()))
        }
    }

    /// launchd labels present on this host, or every configured label when none is listed.
    async fn launchd_labels(&self) -> Vec<String> {
        let listed = self
            .run(&CommandSpec::new("launchctl", ["list"]))
            .await
            .map(|out| {
                self.model_server
                    .launchd_labels
                    .iter()
                    .filter(|label| out.contains(label.as_str()))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if listed.is_empty() {
            self.model_server.launchd_labels.clone()
        } else {
            listed
        }
    }

    async fn launchd_action(&self, action: ControlAction) -> Result<(), ControlError> {
        let mut done = Vec::new();
        let mut errors = Vec::new();

        for label in self.launchd_labels().await {
            let step = match action {
                ControlAction::Start => self.run(&CommandSpec::new("launchctl", ["start", label.as_str()])).await,
                ControlAction::Stop => self.run(&CommandSpec::new("launchctl", ["stop", label.as_str()])).await,
                ControlAction::Restart => {
                    match self.run(&CommandSpec::new("launchctl", ["stop", label.as_str()])).await {
                        Ok(_) => {
                            tokio::time::sleep(self.timing.stop_settle).await;
                            self.run(&CommandSpec::new("launchctl", ["start", label.as_str()])).await
                        }
                        Err(e) => Err(e),
                    }
                }
            };
            match step {
                Ok(_) => done.push(label),
                Err(e) => errors.push(format!("{label}: {e}")),
            }
        }

        if done.is_empty() {
            Err(ControlError::Failed {
                service: ServiceId::ModelServer,
                action,
                detail: if errors.is_empty() {
                    "no launchd label available".to_string()
                } else {
                    errors.join("; ")
                },
            })
        } else {
            info!(labels = %done.join(", "), %action, "launchd action applied");
            Ok(())
        }
    }

    /// Issue the lifecycle command for `service`.
    async fn issue(&self, service: ServiceId, action: ControlAction) -> Result<(), ControlError> {
        let wrap = |source: CommandError| ControlError::Command { service, action, source };
        match (service, action) {
            (ServiceId::Gateway, ControlAction::Start) => match self.run(&self.gateway_command("start")?).await {
                Ok(_) => Ok(()),
                Err(CommandError::NonZeroExit { ref stderr_tail, .. })
                    if stderr_tail.to_lowercase().contains("already") =>
                {
                    Ok(())
                }
                Err(e) => Err(wrap(e)),
            },
            (ServiceId::Gateway, ControlAction::Stop) => {
                self.run(&self.gateway_command("stop")?).await.map(drop).map_err(wrap)
            }
            (ServiceId::Container, ControlAction::Start) => {
                self.run(&self.runtime_command("start")).await.map(drop).map_err(wrap)
            }
            (ServiceId::Container, ControlAction::Stop) => {
                self.run(&self.runtime_command("stop")).await.map(drop).map_err(wrap)
            }
            (ServiceId::ModelServer, _) => match self.manager {
                ServiceManager::Systemd => {
                    let verb = action.to_string();
                    let spec = CommandSpec::new("systemctl", [verb.as_str(), self.model_server.systemd_unit.as_str()]);
                    self.run(&spec).await.map(drop).map_err(wrap)
                }
                ServiceManager::Launchd => self.launchd_action(action).await,
            },
            _ => Err(ControlError::Unsupported { service, action }),
        }
    }

    fn direct_health_url(&self, service: ServiceId) -> Option<&str> {
        match service {
            ServiceId::Gateway => Some(self.gateway.health_url.as_str()),
            _ => None,
        }
    }

    /// Re-probe until healthy, falling back to the direct health endpoint.
    async fn verify_up(&self, service: ServiceId, action: ControlAction) -> ControlReport {
        let direct_timeout = Duration::from_secs(defaults::DIRECT_HEALTH_TIMEOUT_SECS);

        for attempt in 1..=self.timing.verify_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.timing.verify_spacing).await;
            }
            if self.verdict(service).await == Some(HealthVerdict::Healthy) {
                return ControlReport::new(
                    service,
                    action,
                    Verification::Confirmed,
                    format!("{} {action} succeeded, service healthy", service.label()),
                );
            }
            if let Some(url) = self.direct_health_url(service) {
                if self.http.is_up(url, direct_timeout).await {
                    return ControlReport::new(
                        service,
                        action,
                        Verification::HealthEndpoint,
                        format!("{} {action} succeeded (health endpoint answered)", service.label()),
                    );
                }
            }
            debug!(service = %service, attempt, "Not confirmed yet");
        }

        warn!(service = %service, %action, "Could not confirm end state");
        ControlReport::new(
            service,
            action,
            Verification::Unconfirmed,
            format!("{} {action} command executed, please check later", service.label()),
        )
    }

    /// Re-probe until the service reads unhealthy.
    ///
    /// `Unknown` or a missing probe proves nothing, so neither confirms a stop.
    async fn verify_down(&self, service: ServiceId) -> ControlReport {
        let action = ControlAction::Stop;
        for attempt in 1..=self.timing.verify_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.timing.verify_spacing).await;
            }
            if self.verdict(service).await == Some(HealthVerdict::Unhealthy) {
                return ControlReport::new(
                    service,
                    action,
                    Verification::Confirmed,
                    format!("{} stopped", service.label()),
                );
            }
            debug!(service = %service, attempt, "Stop not confirmed yet");
        }

        warn!(service = %service, "Could not confirm stop");
        ControlReport::new(
            service,
            action,
            Verification::Unconfirmed,
            format!("{} stop command executed, please check later", service.label()),
        )
    }

    async fn start_inner(&self, service: ServiceId, action: ControlAction) -> Result<ControlReport, ControlError> {
        if service == ServiceId::Container {
            self.ensure_container_exists().await?;
        }
        self.issue(service, ControlAction::Start).await?;
        tokio::time::sleep(self.timing.start_settle).await;
        Ok(self.verify_up(service, action).await)
    }
}

const fn controllable(service: ServiceId) -> bool {
    matches!(service, ServiceId::Gateway | ServiceId::ModelServer | ServiceId::Container)
}

#[async_trait]
impl ServiceControl for ServiceController {
    async fn start(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        if !controllable(service) {
            return Err(ControlError::Unsupported {
                service,
                action: ControlAction::Start,
            });
        }
        info!(service = %service, "Starting service");

        if self.verdict(service).await == Some(HealthVerdict::Healthy) {
            return Ok(ControlReport::new(
                service,
                ControlAction::Start,
                Verification::AlreadyInState,
                format!("{} is already running", service.label()),
            ));
        }
        self.start_inner(service, ControlAction::Start).await
    }

    async fn stop(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        if !controllable(service) {
            return Err(ControlError::Unsupported {
                service,
                action: ControlAction::Stop,
            });
        }
        info!(service = %service, "Stopping service");

        self.issue(service, ControlAction::Stop).await?;
        tokio::time::sleep(self.timing.stop_settle).await;

        Ok(self.verify_down(service).await)
    }

    async fn restart(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        if !controllable(service) {
            return Err(ControlError::Unsupported {
                service,
                action: ControlAction::Restart,
            });
        }
        info!(service = %service, "Restarting service");

        if service == ServiceId::ModelServer {
            self.issue(service, ControlAction::Restart).await?;
            tokio::time::sleep(self.timing.restart_gap).await;
            return Ok(self.verify_up(service, ControlAction::Restart).await);
        }

        if let Err(e) = self.stop(service).await {
            warn!(service = %service, error = %e, "Stop before restart failed, starting anyway");
        }
        tokio::time::sleep(self.timing.restart_gap).await;
        self.start_inner(service, ControlAction::Restart).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HttpReply, Probe, ProbeError, ProbeResult};
    use crate::runner::fake::ScriptedRunner;
    use std::sync::Mutex;

    /// Replays verdicts in order; the last one repeats.
    struct SeqProbe {
        id: ServiceId,
        verdicts: Mutex<Vec<HealthVerdict>>,
    }

    impl SeqProbe {
        fn new(id: ServiceId, verdicts: &[HealthVerdict]) -> Arc<Self> {
            Arc::new(Self {
                id,
                verdicts: Mutex::new(verdicts.to_vec()),
            })
        }
    }

    #[async_trait]
    impl Probe for SeqProbe {
        fn service_id(&self) -> ServiceId {
            self.id
        }
        async fn check(&self) -> ProbeResult {
            let mut v = self.verdicts.lock().unwrap();
            let verdict = if v.len() > 1 { v.remove(0) } else { v[0] };
            ProbeResult::new(self.id, verdict, "scripted")
        }
    }

    struct Unreachable;

    #[async_trait]
    impl HttpCheck for Unreachable {
        async fn get(&self, _url: &str, _timeout: Duration) -> Result<HttpReply, ProbeError> {
            Err(ProbeError::Connect("refused".to_string()))
        }
    }

    struct AlwaysUp;

    #[async_trait]
    impl HttpCheck for AlwaysUp {
        async fn get(&self, _url: &str, _timeout: Duration) -> Result<HttpReply, ProbeError> {
            Ok(HttpReply {
                status: 200,
                body: "{}".to_string(),
            })
        }
    }

    fn controller(runner: Arc<ScriptedRunner>, probe: Arc<SeqProbe>, http: Arc<dyn HttpCheck>) -> ServiceController {
        let probes = ProbeSet::new(vec![probe as Arc<dyn Probe>], Duration::from_secs(1));
        ServiceController::new(&WardenConfig::default(), runner, http, probes)
            .with_timing(ControlTiming::immediate(3))
            .with_service_manager(ServiceManager::Systemd)
    }

    use HealthVerdict::{Healthy, Unhealthy};

    #[tokio::test]
    async fn test_start_on_healthy_service_issues_no_command() {
        let runner = Arc::new(ScriptedRunner::new());
        let ctl = controller(runner.clone(), SeqProbe::new(ServiceId::Gateway, &[Healthy]), Arc::new(Unreachable));
        let report = ctl.start(ServiceId::Gateway).await.unwrap();
        assert_eq!(report.verification, Verification::AlreadyInState);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_confirmed_by_reprobe() {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = SeqProbe::new(ServiceId::Gateway, &[Unhealthy, Unhealthy, Healthy]);
        let ctl = controller(runner.clone(), probe, Arc::new(Unreachable));
        let report = ctl.start(ServiceId::Gateway).await.unwrap();
        assert_eq!(report.verification, Verification::Confirmed);
        assert_eq!(runner.calls(), vec!["openclaw gateway start"]);
    }

    #[tokio::test]
    async fn test_start_falls_back_to_health_endpoint() {
        let runner = Arc::new(ScriptedRunner::new());
        let ctl = controller(runner, SeqProbe::new(ServiceId::Gateway, &[Unhealthy]), Arc::new(AlwaysUp));
        let report = ctl.start(ServiceId::Gateway).await.unwrap();
        assert_eq!(report.verification, Verification::HealthEndpoint);
    }

    #[tokio::test]
    async fn test_unconfirmed_start_still_succeeds_with_caveat() {
        let runner = Arc::new(ScriptedRunner::new());
        let ctl = controller(runner, SeqProbe::new(ServiceId::Gateway, &[Unhealthy]), Arc::new(Unreachable));
        let report = ctl.start(ServiceId::Gateway).await.unwrap();
        assert!(!report.is_certain());
        assert!(report.message.contains("please check later"));
    }

    #[tokio::test]
    async fn test_start_command_failure_is_error() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "openclaw gateway start",
            Err(CommandError::NonZeroExit {
                code: Some(1),
                stderr_tail: "permission denied".to_string(),
            }),
        ));
        let ctl = controller(runner, SeqProbe::new(ServiceId::Gateway, &[Unhealthy]), Arc::new(Unreachable));
        assert!(matches!(
            ctl.start(ServiceId::Gateway).await,
            Err(ControlError::Command { .. })
        ));
    }

    #[tokio::test]
    async fn test_already_running_stderr_is_tolerated() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "openclaw gateway start",
            Err(CommandError::NonZeroExit {
                code: Some(1),
                stderr_tail: "Gateway already running".to_string(),
            }),
        ));
        let probe = SeqProbe::new(ServiceId::Gateway, &[Unhealthy, Healthy]);
        let ctl = controller(runner, probe, Arc::new(Unreachable));
        assert!(ctl.start(ServiceId::Gateway).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_reprobes_until_service_is_down() {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = SeqProbe::new(ServiceId::Gateway, &[Healthy, Healthy, Unhealthy]);
        let ctl = controller(runner.clone(), probe, Arc::new(Unreachable));
        let report = ctl.stop(ServiceId::Gateway).await.unwrap();
        assert_eq!(report.verification, Verification::Confirmed);
        assert_eq!(runner.calls(), vec!["openclaw gateway stop"]);
    }

    #[tokio::test]
    async fn test_stop_with_unknown_verdict_is_unconfirmed() {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = SeqProbe::new(ServiceId::Container, &[HealthVerdict::Unknown]);
        let ctl = controller(runner, probe, Arc::new(Unreachable));
        let report = ctl.stop(ServiceId::Container).await.unwrap();
        assert_eq!(report.verification, Verification::Unconfirmed);
        assert!(!report.is_certain());
    }

    #[tokio::test]
    async fn test_stop_without_probe_is_unconfirmed() {
        let runner = Arc::new(ScriptedRunner::new());
        let ctl = controller(runner, SeqProbe::new(ServiceId::Disk, &[Healthy]), Arc::new(Unreachable));
        let report = ctl.stop(ServiceId::Gateway).await.unwrap();
        assert_eq!(report.verification, Verification::Unconfirmed);
    }

    #[tokio::test]
    async fn test_missing_container_is_not_started() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "docker ps -a --filter name=seekdb --format {{.Names}}",
            Ok(String::new()),
        ));
        let ctl = controller(runner.clone(), SeqProbe::new(ServiceId::Container, &[Unhealthy]), Arc::new(Unreachable));
        assert!(matches!(
            ctl.start(ServiceId::Container).await,
            Err(ControlError::ContainerMissing(_))
        ));
        assert!(!runner.calls().iter().any(|c| c == "docker start seekdb"));
    }

    #[tokio::test]
    async fn test_restart_continues_after_failed_stop() {
        let runner = Arc::new(ScriptedRunner::new().reply(
            "openclaw gateway stop",
            Err(CommandError::Timeout { secs: 30 }),
        ));
        let probe = SeqProbe::new(ServiceId::Gateway, &[Healthy]);
        let ctl = controller(runner.clone(), probe, Arc::new(Unreachable));
        let report = ctl.restart(ServiceId::Gateway).await.unwrap();
        assert_eq!(report.action, ControlAction::Restart);
        assert_eq!(runner.calls(), vec!["openclaw gateway stop", "openclaw gateway start"]);
    }

    #[tokio::test]
    async fn test_model_server_restart_uses_systemd() {
        let runner = Arc::new(ScriptedRunner::new());
        let probe = SeqProbe::new(ServiceId::ModelServer, &[Healthy]);
        let ctl = controller(runner.clone(), probe, Arc::new(Unreachable));
        let report = ctl.restart(ServiceId::ModelServer).await.unwrap();
        assert_eq!(report.verification, Verification::Confirmed);
        assert_eq!(runner.calls(), vec!["systemctl restart ollama"]);
    }

    #[tokio::test]
    async fn test_launchd_restart_uses_listed_label() {
        let runner = Arc::new(
            ScriptedRunner::new().reply("launchctl list", Ok("123\t0\tcom.ollama.ollama".to_string())),
        );
        let probe = SeqProbe::new(ServiceId::ModelServer, &[Healthy]);
        let ctl = controller(runner.clone(), probe, Arc::new(Unreachable)).with_service_manager(ServiceManager::Launchd);
        ctl.restart(ServiceId::ModelServer).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "launchctl list",
                "launchctl stop com.ollama.ollama",
                "launchctl start com.ollama.ollama"
            ]
        );
    }

    #[tokio::test]
    async fn test_disk_is_not_controllable() {
        let runner = Arc::new(ScriptedRunner::new());
        let ctl = controller(runner, SeqProbe::new(ServiceId::Disk, &[Healthy]), Arc::new(Unreachable));
        assert!(matches!(
            ctl.restart(ServiceId::Disk).await,
            Err(ControlError::Unsupported { .. })
        ));
    }
}
