//! Worker loop: dequeue, execute, persist, report.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use proof_engine::Metrics;
use serde_json::{json, Value};
use sim_sandbox::{SandboxManager, SandboxResult, SandboxRuntime};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::artifacts::{parse_metrics, ArtifactSink};
use crate::audit::{RunAuditEvent, RunAuditLog};
use crate::callback::{BackendClient, CompletionReport};
use crate::config::RunnerConfig;
use crate::job::Job;
use crate::queue::{JobQueue, RunStatus};

const QUEUE_RETRY_DELAY: Duration = Duration::from_secs(5);
const LOOP_ERROR_DELAY: Duration = Duration::from_secs(1);

/// Long-lived worker owning every client for the duration of the process.
/// One job in flight at a time; scale-out is by process count.
pub struct Runner<R: SandboxRuntime> {
    config: RunnerConfig,
    queue: JobQueue,
    sandbox: SandboxManager<R>,
    sink: ArtifactSink,
    backend: BackendClient,
    audit: Option<RunAuditLog>,
    shutdown: Arc<AtomicBool>,
    last_callback: Option<Instant>,
}

impl<R: SandboxRuntime> Runner<R> {
    pub fn new(
        config: RunnerConfig,
        queue: JobQueue,
        sandbox: SandboxManager<R>,
        sink: ArtifactSink,
        backend: BackendClient,
        audit: Option<RunAuditLog>,
    ) -> Self {
        Self {
            config,
            queue,
            sandbox,
            sink,
            backend,
            audit,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_callback: None,
        }
    }

    /// Drains the queue until a termination signal arrives. The in-flight
    /// job always runs to completion; the flag is observed on the next poll.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            queue = %self.config.job_queue,
            "runner started"
        );
        install_signal_handlers(self.shutdown.clone())?;

        while !self.shutdown.load(Ordering::Relaxed) {
            let payload = match self.queue.pop_job().await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "queue connection error");
                    sleep(QUEUE_RETRY_DELAY).await;
                    continue;
                }
            };

            // Poison message: retrying a producer bug would loop forever, so
            // the payload is dropped with no status emitted.
            let job = match Job::parse(&payload) {
                Ok(job) => job,
                Err(err) => {
                    error!(error = %err, "dropping malformed job payload");
                    continue;
                }
            };

            let run_id = job.run_id.clone();
            if let Err(err) = self.process_job(job).await {
                error!(run_id = %run_id, error = %err, "error processing job");
                let detail = json!({"success": false, "error": err.to_string()});
                if let Err(status_err) = self
                    .queue
                    .publish_status(&run_id, RunStatus::Failed, Some(&detail))
                    .await
                {
                    error!(run_id = %run_id, error = %status_err, "failed to record failure status");
                }
                sleep(LOOP_ERROR_DELAY).await;
            }
        }

        info!("runner shutdown complete");
        Ok(())
    }

    async fn process_job(&mut self, job: Job) -> Result<()> {
        let run_id = job.run_id.clone();
        info!(
            run_id = %run_id,
            job_type = %job.job_type,
            simulation_id = %job.simulation_id,
            "processing job"
        );

        self.audit_event(RunAuditEvent::job_received(
            &run_id,
            &self.config.worker_id,
            &job.simulation_id,
        ))
        .await;

        self.queue
            .publish_status(&run_id, RunStatus::Running, None)
            .await
            .context("publishing running status")?;

        let result = self
            .sandbox
            .execute(
                &job.simulation_id,
                &job.candidate_code,
                &job.candidate_writeup,
                &run_id,
            )
            .await;

        if result.success {
            self.complete_job(&run_id, &result).await
        } else {
            self.fail_job(&run_id, &result).await
        }
    }

    async fn complete_job(&mut self, run_id: &str, result: &SandboxResult) -> Result<()> {
        let urls = self.sink.upload_artifacts(run_id, &result.artifacts).await;
        let metrics = parse_metrics(&result.artifacts).await;
        result.discard_artifacts().await;

        self.send_callback(
            run_id,
            &CompletionReport {
                success: true,
                metrics: &metrics,
                artifact_urls: &urls,
                duration_seconds: result.duration_seconds,
            },
        )
        .await;

        let payload = success_payload(&metrics, &urls, result.duration_seconds);
        self.queue
            .publish_status(run_id, RunStatus::Completed, Some(&payload))
            .await
            .context("publishing completed status")?;

        self.audit_event(RunAuditEvent::completed(
            run_id,
            &self.config.worker_id,
            result.exit_code,
            (result.duration_seconds * 1000.0) as u64,
            result.artifacts.len(),
        ))
        .await;

        info!(run_id, "job completed");
        Ok(())
    }

    async fn fail_job(&mut self, run_id: &str, result: &SandboxResult) -> Result<()> {
        let error = result
            .error
            .clone()
            .unwrap_or_else(|| "Sandbox execution failed".to_string());
        warn!(run_id, error = %error, exit_code = result.exit_code, "job failed");

        // The callback always goes out, with empty metrics and URLs, so the
        // control-plane run reaches a terminal state.
        let metrics = Metrics::new();
        let urls = BTreeMap::new();
        self.send_callback(
            run_id,
            &CompletionReport {
                success: false,
                metrics: &metrics,
                artifact_urls: &urls,
                duration_seconds: result.duration_seconds,
            },
        )
        .await;

        let payload = failure_payload(&error, result);
        self.queue
            .publish_status(run_id, RunStatus::Failed, Some(&payload))
            .await
            .context("publishing failed status")?;

        self.audit_event(RunAuditEvent::failed(run_id, &self.config.worker_id, &error))
            .await;
        Ok(())
    }

    async fn send_callback(&mut self, run_id: &str, report: &CompletionReport<'_>) {
        if !self.config.callback_min_interval.is_zero() {
            if let Some(last) = self.last_callback {
                let elapsed = last.elapsed();
                if elapsed < self.config.callback_min_interval {
                    sleep(self.config.callback_min_interval - elapsed).await;
                }
            }
        }
        self.last_callback = Some(Instant::now());

        if let Err(err) = self.backend.notify_complete(run_id, report).await {
            warn!(run_id, error = %err, "completion callback failed");
            self.audit_event(RunAuditEvent::callback_failed(
                run_id,
                &self.config.worker_id,
                &err.to_string(),
            ))
            .await;
        }
    }

    async fn audit_event(&self, event: RunAuditEvent) {
        if let Some(log) = &self.audit {
            if let Err(err) = log.append(&event).await {
                warn!(error = %err, "failed to append audit event");
            }
        }
    }
}

fn success_payload(
    metrics: &Metrics,
    artifact_urls: &BTreeMap<String, String>,
    duration_seconds: f64,
) -> Value {
    json!({
        "success": true,
        "metrics": metrics,
        "artifact_urls": artifact_urls,
        "duration_seconds": duration_seconds,
    })
}

fn failure_payload(error: &str, result: &SandboxResult) -> Value {
    json!({
        "success": false,
        "error": error,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "duration_seconds": result.duration_seconds,
    })
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.store(true, Ordering::Relaxed);
    });

    Ok(())
}
