mod artifacts;
mod audit;
mod callback;
mod config;
mod job;
mod queue;
mod runner;
mod telemetry;

use anyhow::{Context, Result};
use sim_sandbox::SandboxManager;
use tracing::warn;

use crate::artifacts::ArtifactSink;
use crate::audit::RunAuditLog;
use crate::callback::BackendClient;
use crate::config::RunnerConfig;
use crate::queue::JobQueue;
use crate::runner::Runner;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("sim-runner")?;

    let config = RunnerConfig::from_env()?;

    let queue = JobQueue::connect(&config.redis_url, &config.job_queue, config.poll_timeout)
        .context("connecting to job queue")?;
    let sandbox =
        SandboxManager::connect(config.sandbox.clone()).context("connecting to docker daemon")?;
    let sink = ArtifactSink::connect(&config).await;
    let backend = BackendClient::new(&config.backend_url, &config.backend_api_key)?;
    let audit = RunAuditLog::from_config(&config.audit).context("opening audit log")?;

    // Best-effort warm-up; per-job launches still surface a missing image.
    if let Err(err) = sandbox.runtime().ensure_image(&config.sandbox.image).await {
        warn!(image = %config.sandbox.image, error = %err, "failed to ensure sandbox image");
    }

    Runner::new(config, queue, sandbox, sink, backend, audit)
        .run()
        .await
}
