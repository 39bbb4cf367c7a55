//! Container runtime seam.
//!
//! The executor talks to containers through the [`SandboxRuntime`] trait so
//! tests can substitute a fake; the production implementation drives Docker
//! via bollard.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// cgroup CFS period backing the CPU quota, in microseconds.
const CPU_PERIOD_MICROS: i64 = 100_000;

/// Everything needed to launch one grader container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub workspace_dir: PathBuf,
    pub sim_dir: PathBuf,
    pub memory_limit_bytes: u64,
    pub cpu_limit_cores: f64,
    pub network_disabled: bool,
    pub timeout: Duration,
}

/// Raw result of one container run, before executor-level shaping.
#[derive(Debug, Clone)]
pub struct ContainerOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("sandbox image not found: {0}")]
    ImageMissing(String),
    #[error("container wait stream ended without a status")]
    MissingStatus,
    #[error("container runtime error: {0}")]
    Docker(#[from] BollardError),
}

#[async_trait]
pub trait SandboxRuntime: Send + Sync + 'static {
    /// Runs the container to completion (or timeout). Implementations must
    /// release the container on every path; the workspace belongs to the
    /// caller.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutcome, RuntimeError>;
}

/// Docker-backed runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Pulls the sandbox image when it is not present locally. Called once at
    /// worker startup; per-job launches still surface `ImageMissing` if the
    /// image disappears afterwards.
    pub async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(err) => return Err(err.into()),
        }

        info!(image, "pulling sandbox image");
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions::<String> {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            let update = progress?;
            if let Some(status) = update.status {
                debug!(image, status, "image pull progress");
            }
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let host_config = HostConfig {
            binds: Some(vec![
                format!("{}:/workspace", spec.workspace_dir.display()),
                format!("{}:/sim:ro", spec.sim_dir.display()),
            ]),
            memory: Some(spec.memory_limit_bytes as i64),
            cpu_period: Some(CPU_PERIOD_MICROS),
            cpu_quota: Some((spec.cpu_limit_cores * CPU_PERIOD_MICROS as f64) as i64),
            network_mode: spec.network_disabled.then(|| "none".to_string()),
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.container_name.clone(),
            platform: None,
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(_) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(RuntimeError::ImageMissing(spec.image.clone())),
            Err(err) => Err(err.into()),
        }
    }

    async fn drive(&self, spec: &ContainerSpec) -> Result<ContainerOutcome, RuntimeError> {
        self.docker
            .start_container(&spec.container_name, None::<StartContainerOptions<String>>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(&spec.container_name, None::<WaitContainerOptions<String>>);

        let exit_code = match tokio::time::timeout(spec.timeout, wait.next()).await {
            Err(_) => {
                warn!(container = %spec.container_name, "sandbox timed out, killing container");
                if let Err(err) = self
                    .docker
                    .kill_container(&spec.container_name, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = %spec.container_name, error = %err, "failed to kill container");
                }
                return Ok(ContainerOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                });
            }
            Ok(None) => return Err(RuntimeError::MissingStatus),
            Ok(Some(Ok(response))) => response.status_code,
            // bollard reports non-zero exits through the error channel.
            Ok(Some(Err(BollardError::DockerContainerWaitError { code, .. }))) => code,
            Ok(Some(Err(err))) => return Err(err.into()),
        };

        let stdout = self.collect_logs(&spec.container_name, true).await?;
        let stderr = self.collect_logs(&spec.container_name, false).await?;

        Ok(ContainerOutcome {
            exit_code,
            stdout,
            stderr,
            timed_out: false,
        })
    }

    async fn collect_logs(&self, container: &str, stdout: bool) -> Result<String, BollardError> {
        let options = LogsOptions::<String> {
            stdout,
            stderr: !stdout,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container, Some(options));
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    buffer.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(buffer)
    }

    async fn remove_quietly(&self, container: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(err) = self.docker.remove_container(container, Some(options)).await {
            if !matches!(
                err,
                BollardError::DockerResponseServerError {
                    status_code: 404,
                    ..
                }
            ) {
                warn!(container, error = %err, "failed to remove container");
            }
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutcome, RuntimeError> {
        self.create(spec).await?;
        let outcome = self.drive(spec).await;
        self.remove_quietly(&spec.container_name).await;
        outcome
    }
}
