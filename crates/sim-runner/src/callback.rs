//! Completion callback to the control plane.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use proof_engine::Metrics;
use serde::Serialize;
use tracing::{info, warn};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of the completion POST. Sent for every dequeued job, success or not,
/// so control-plane runs never get stuck in a non-terminal state.
#[derive(Debug, Serialize)]
pub struct CompletionReport<'a> {
    pub success: bool,
    pub metrics: &'a Metrics,
    pub artifact_urls: &'a BTreeMap<String, String>,
    pub duration_seconds: f64,
}

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .context("building callback HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// POSTs the completion report. Non-2xx responses and transport errors
    /// are reported as errors; the caller logs and moves on (no retry, the
    /// control plane reconciles from the status key).
    pub async fn notify_complete(&self, run_id: &str, report: &CompletionReport<'_>) -> Result<()> {
        let url = format!("{}/api/internal/runs/{}/complete", self.base_url, run_id);

        let response = self
            .http
            .post(&url)
            .header("X-Internal-Key", &self.api_key)
            .json(report)
            .send()
            .await
            .with_context(|| format!("posting completion for {run_id}"))?;

        let status = response.status();
        if status.is_success() {
            info!(run_id, "backend notified");
            Ok(())
        } else {
            warn!(run_id, status = %status, "backend rejected completion callback");
            anyhow::bail!("completion callback for {run_id} returned {status}")
        }
    }
}
