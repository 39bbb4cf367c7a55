//! Append-only audit trail of run handling.
//!
//! One JSONL line per event, optionally HMAC-signed so an operator can
//! verify the trail was not edited after the fact. Disabled by default.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_path: PathBuf,
    pub hmac_key: Option<Vec<u8>>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: PathBuf::from("./logs/runs.jsonl"),
            hmac_key: None,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct RunAuditEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub worker_id: String,
    #[serde(flatten)]
    pub kind: RunAuditEventKind,
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type")]
pub enum RunAuditEventKind {
    #[serde(rename = "job_received")]
    JobReceived { simulation_id: String },
    #[serde(rename = "run_completed")]
    Completed {
        exit_code: i64,
        duration_ms: u64,
        artifact_count: usize,
    },
    #[serde(rename = "run_failed")]
    Failed { error: String },
    #[serde(rename = "callback_failed")]
    CallbackFailed { detail: String },
}

impl RunAuditEvent {
    fn new(run_id: &str, worker_id: &str, kind: RunAuditEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            worker_id: worker_id.to_string(),
            kind,
        }
    }

    pub fn job_received(run_id: &str, worker_id: &str, simulation_id: &str) -> Self {
        Self::new(
            run_id,
            worker_id,
            RunAuditEventKind::JobReceived {
                simulation_id: simulation_id.to_string(),
            },
        )
    }

    pub fn completed(
        run_id: &str,
        worker_id: &str,
        exit_code: i64,
        duration_ms: u64,
        artifact_count: usize,
    ) -> Self {
        Self::new(
            run_id,
            worker_id,
            RunAuditEventKind::Completed {
                exit_code,
                duration_ms,
                artifact_count,
            },
        )
    }

    pub fn failed(run_id: &str, worker_id: &str, error: &str) -> Self {
        Self::new(
            run_id,
            worker_id,
            RunAuditEventKind::Failed {
                error: error.to_string(),
            },
        )
    }

    pub fn callback_failed(run_id: &str, worker_id: &str, detail: &str) -> Self {
        Self::new(
            run_id,
            worker_id,
            RunAuditEventKind::CallbackFailed {
                detail: detail.to_string(),
            },
        )
    }
}

#[derive(Debug)]
pub struct RunAuditLog {
    path: PathBuf,
    hmac_key: Option<Vec<u8>>,
    lock: Mutex<()>,
}

impl RunAuditLog {
    /// Opens the log for appending, creating parent directories. Returns
    /// `None` when auditing is disabled.
    pub fn from_config(config: &AuditConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        if let Some(parent) = config.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating audit log directory {}", parent.display()))?;
        }

        Ok(Some(Self {
            path: config.log_path.clone(),
            hmac_key: config.hmac_key.clone(),
            lock: Mutex::new(()),
        }))
    }

    pub async fn append(&self, event: &RunAuditEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).context("serializing audit event")?;

        let signature = match &self.hmac_key {
            Some(key) => {
                let mut mac =
                    HmacSha256::new_from_slice(key).context("initializing audit HMAC")?;
                mac.update(&payload);
                Some(STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
            }
            None => None,
        };

        #[derive(Serialize)]
        struct SignedLine<'a> {
            #[serde(flatten)]
            event: &'a RunAuditEvent,
            #[serde(skip_serializing_if = "Option::is_none")]
            signature: Option<String>,
        }

        let line =
            serde_json::to_vec(&SignedLine { event, signature }).context("serializing audit line")?;

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening audit log {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}
