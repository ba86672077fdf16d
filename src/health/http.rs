//! HTTP GET seam used by the model-server probe and control verification.

use async_trait::async_trait;
use std::time::Duration;

use super::ProbeError;

/// Status code and body of one GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub const fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[async_trait]
pub trait HttpCheck: Send + Sync {
    /// GET `url`; any response, whatever its status, is `Ok`.
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply, ProbeError>;

    /// True when `url` answers 200 within `timeout`.
    async fn is_up(&self, url: &str, timeout: Duration) -> bool {
        matches!(self.get(url, timeout).await, Ok(reply) if reply.is_ok())
    }
}

/// `reqwest`-backed implementation.
#[derive(Debug, Clone, Default)]
pub struct ReqwestCheck {
    client: reqwest::Client,
}

impl ReqwestCheck {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpCheck for ReqwestCheck {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply, ProbeError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(&e, timeout))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| classify(&e, timeout))?;
        Ok(HttpReply { status, body })
    }
}

fn classify(e: &reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        ProbeError::Connect(e.to_string())
    } else {
        ProbeError::Http(e.to_string())
    }
}
