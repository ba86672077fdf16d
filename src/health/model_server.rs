//! Model-server probe: GET the tag listing and count installed models.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{HttpCheck, Probe, ProbeError, ProbeResult, ServiceId};
use crate::config::defaults;

pub struct ModelServerProbe {
    http: Arc<dyn HttpCheck>,
    url: String,
}

impl ModelServerProbe {
    pub fn new(http: Arc<dyn HttpCheck>, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

/// Number of entries in the `models` array, if the body carries one.
pub fn count_models(body: &str) -> Option<usize> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("models")?.as_array().map(Vec::len)
}

#[async_trait]
impl Probe for ModelServerProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::ModelServer
    }

    async fn check(&self) -> ProbeResult {
        let timeout = Duration::from_secs(defaults::MODEL_SERVER_HTTP_TIMEOUT_SECS);
        match self.http.get(&self.url, timeout).await {
            Ok(reply) if reply.is_ok() => {
                let models = count_models(&reply.body).unwrap_or(0);
                ProbeResult::healthy(ServiceId::ModelServer, format!("running ({models} models)"))
            }
            Ok(reply) => ProbeResult::unhealthy(
                ServiceId::ModelServer,
                format!("unexpected response: HTTP {}", reply.status),
            ),
            Err(ProbeError::Connect(_)) => ProbeResult::unhealthy(ServiceId::ModelServer, "connection refused"),
            Err(ProbeError::Timeout(secs)) => {
                ProbeResult::unhealthy(ServiceId::ModelServer, format!("no answer within {secs}s"))
            }
            Err(e) => ProbeResult::unhealthy(ServiceId::ModelServer, format!("check failed: {e}")),
        }
    }
}
