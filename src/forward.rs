use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ForwardConfig;
use crate::error::AppError;
use crate::ingest::ReadingSink;
use crate::reading::Reading;

pub const INGEST_PATH: &str = "/api/v1/readings";

/// Pushes decoded readings to a remote server's ingest endpoint.
pub struct Forwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl Forwarder {
    pub fn new(cfg: &ForwardConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint_url(&cfg.url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), INGEST_PATH)
}

#[async_trait]
impl ReadingSink for Forwarder {
    async fn accept(&self, reading: Reading) -> Result<(), AppError> {
        let resp = self.client.post(&self.endpoint).json(&reading).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, endpoint = %self.endpoint, body = %body, "remote rejected reading");
            return Err(AppError::Transport(format!(
                "remote ingest returned {}",
                status
            )));
        }
        debug!(endpoint = %self.endpoint, ts = %reading.timestamp, "reading forwarded");
        Ok(())
    }
}
