//! Isolated execution of simulation jobs.
//!
//! The executor materializes a per-run workspace, launches the grader in a
//! resource-capped container with networking disabled, and captures exit
//! status, bounded logs and the well-known artifact files. Every failure
//! mode is folded into the returned [`SandboxResult`]; `execute` never
//! raises, which keeps the job runner's control flow flat.

pub mod runtime;
pub mod workspace;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub use runtime::{ContainerOutcome, ContainerSpec, DockerRuntime, RuntimeError, SandboxRuntime};
pub use workspace::Workspace;

/// Closed set of artifact files the grader may leave in `output/`.
pub const ARTIFACT_FILES: &[&str] = &[
    "metrics.json",
    "testlog.txt",
    "coverage.xml",
    "diff.patch",
    "grader_output.json",
];

/// Upper bound on captured stdout/stderr, in characters. Downstream
/// consumers assume this bound.
pub const LOG_CAPTURE_LIMIT: usize = 5_000;

/// Executor configuration, resolved once at worker startup.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub image: String,
    pub sims_path: PathBuf,
    pub workspace_root: PathBuf,
    pub memory_limit_bytes: u64,
    pub cpu_limit_cores: f64,
    pub network_disabled: bool,
    pub timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "simproof-sandbox:latest".to_string(),
            sims_path: PathBuf::from("/app/sims"),
            workspace_root: std::env::temp_dir(),
            memory_limit_bytes: 512 * 1024 * 1024,
            cpu_limit_cores: 1.0,
            network_disabled: true,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Result of one sandbox execution.
///
/// Invariant: `success` holds exactly when the container exited zero and no
/// executor-level error occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_seconds: f64,
    /// Artifact name to readable local path. Paths live in a staging
    /// directory that outlives the workspace; the caller removes it once the
    /// files are persisted.
    pub artifacts: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxResult {
    fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            duration_seconds: duration.as_secs_f64(),
            artifacts: BTreeMap::new(),
            artifact_dir: None,
            error: Some(error.into()),
        }
    }

    /// Removes the artifact staging directory, if any. Safe to call after
    /// uploads; missing directories are ignored.
    pub async fn discard_artifacts(&self) {
        if let Some(dir) = &self.artifact_dir {
            match fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "failed to remove artifact staging dir");
                }
            }
        }
    }
}

/// Executes simulation jobs in isolated containers.
pub struct SandboxManager<R: SandboxRuntime> {
    runtime: R,
    config: SandboxConfig,
}

impl SandboxManager<DockerRuntime> {
    /// Connects to the local Docker daemon.
    pub fn connect(config: SandboxConfig) -> Result<Self, RuntimeError> {
        Ok(Self::new(DockerRuntime::connect()?, config))
    }
}

impl<R: SandboxRuntime> SandboxManager<R> {
    pub fn new(runtime: R, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Executes one simulation job.
    ///
    /// Failures of any kind (missing simulation, missing image, timeout,
    /// non-zero exit, runtime faults) are reported in the returned value.
    /// The workspace is removed on every path before this returns.
    pub async fn execute(
        &self,
        simulation_id: &str,
        candidate_code: &str,
        candidate_writeup: &str,
        run_id: &str,
    ) -> SandboxResult {
        let started = Instant::now();

        let sim_dir = self.config.sims_path.join(simulation_id);
        if fs::metadata(&sim_dir).await.is_err() {
            return SandboxResult::failure(
                format!("simulation not found: {simulation_id}"),
                started.elapsed(),
            );
        }

        let workspace = match Workspace::create(
            &self.config.workspace_root,
            run_id,
            &sim_dir,
            candidate_code,
            candidate_writeup,
        )
        .await
        {
            Ok(workspace) => workspace,
            Err(err) => {
                warn!(run_id, error = %err, "failed to materialize workspace");
                return SandboxResult::failure(
                    format!("failed to materialize workspace: {err:#}"),
                    started.elapsed(),
                );
            }
        };

        info!(
            run_id,
            simulation_id,
            workspace = %workspace.path().display(),
            "starting sandbox execution"
        );

        let spec = ContainerSpec {
            container_name: format!("simproof-{}", Uuid::new_v4().simple()),
            image: self.config.image.clone(),
            command: vec![
                "python".to_string(),
                "-m".to_string(),
                "grader".to_string(),
                "--run-id".to_string(),
                run_id.to_string(),
            ],
            workspace_dir: workspace.path().to_path_buf(),
            sim_dir,
            memory_limit_bytes: self.config.memory_limit_bytes,
            cpu_limit_cores: self.config.cpu_limit_cores,
            network_disabled: self.config.network_disabled,
            timeout: self.config.timeout,
        };

        let outcome = match self.runtime.run(&spec).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(run_id, error = %err, "sandbox runtime failure");
                remove_workspace(workspace, run_id).await;
                return SandboxResult::failure(err.to_string(), started.elapsed());
            }
        };

        if outcome.timed_out {
            remove_workspace(workspace, run_id).await;
            return SandboxResult {
                success: false,
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                duration_seconds: started.elapsed().as_secs_f64(),
                artifacts: BTreeMap::new(),
                artifact_dir: None,
                error: Some("Execution timed out".to_string()),
            };
        }

        let (artifacts, artifact_dir) = self
            .stash_artifacts(&workspace.output_dir(), run_id)
            .await;
        remove_workspace(workspace, run_id).await;

        let duration = started.elapsed();
        let success = outcome.exit_code == 0;

        info!(
            run_id,
            success,
            exit_code = outcome.exit_code,
            duration_seconds = duration.as_secs_f64(),
            artifact_count = artifacts.len(),
            "sandbox execution complete"
        );

        SandboxResult {
            success,
            exit_code: outcome.exit_code,
            stdout: truncate_log(outcome.stdout),
            stderr: truncate_log(outcome.stderr),
            duration_seconds: duration.as_secs_f64(),
            artifacts,
            artifact_dir,
            error: None,
        }
    }

    /// Copies the well-known artifact files out of `output/` into a staging
    /// directory that survives workspace removal. Absent names are simply
    /// absent from the map.
    async fn stash_artifacts(
        &self,
        output_dir: &Path,
        run_id: &str,
    ) -> (BTreeMap<String, PathBuf>, Option<PathBuf>) {
        let mut artifacts = BTreeMap::new();

        let stash = self
            .config
            .workspace_root
            .join(format!("simproof-artifacts-{}", Uuid::new_v4().simple()));

        for &name in ARTIFACT_FILES {
            let source = output_dir.join(name);
            if fs::metadata(&source).await.is_err() {
                continue;
            }
            if artifacts.is_empty() {
                if let Err(err) = fs::create_dir_all(&stash).await {
                    warn!(run_id, error = %err, "failed to create artifact staging dir");
                    return (artifacts, None);
                }
            }
            let target = stash.join(name);
            match fs::copy(&source, &target).await {
                Ok(_) => {
                    artifacts.insert(name.to_string(), target);
                }
                Err(err) => {
                    warn!(run_id, artifact = name, error = %err, "failed to stash artifact");
                }
            }
        }

        if artifacts.is_empty() {
            (artifacts, None)
        } else {
            (artifacts, Some(stash))
        }
    }
}

async fn remove_workspace(workspace: Workspace, run_id: &str) {
    if let Err(err) = workspace.remove().await {
        warn!(run_id, error = %err, "failed to remove workspace");
    }
}

/// Truncates captured output to [`LOG_CAPTURE_LIMIT`] characters.
fn truncate_log(log: String) -> String {
    match log.char_indices().nth(LOG_CAPTURE_LIMIT) {
        Some((byte_offset, _)) => log[..byte_offset].to_string(),
        None => log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_log_bounds_long_output() {
        let long = "x".repeat(LOG_CAPTURE_LIMIT + 100);
        assert_eq!(truncate_log(long).chars().count(), LOG_CAPTURE_LIMIT);
    }

    #[test]
    fn truncate_log_leaves_short_output_alone() {
        assert_eq!(truncate_log("hello".to_string()), "hello");
    }

    #[test]
    fn truncate_log_respects_multibyte_boundaries() {
        let long = "é".repeat(LOG_CAPTURE_LIMIT + 10);
        let truncated = truncate_log(long);
        assert_eq!(truncated.chars().count(), LOG_CAPTURE_LIMIT);
    }

    #[test]
    fn artifact_name_set_is_closed() {
        assert_eq!(ARTIFACT_FILES.len(), 5);
        assert!(ARTIFACT_FILES.contains(&"metrics.json"));
        assert!(ARTIFACT_FILES.contains(&"grader_output.json"));
    }
}
