//! Worker configuration, read from environment at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use sim_sandbox::SandboxConfig;

use crate::audit::AuditConfig;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub redis_url: String,
    pub job_queue: String,
    pub poll_timeout: Duration,

    pub s3_endpoint: Option<String>,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,

    pub backend_url: String,
    pub backend_api_key: String,
    /// Minimum spacing between completion callbacks; zero disables pacing.
    pub callback_min_interval: Duration,

    pub sandbox: SandboxConfig,
    pub worker_id: String,
    pub audit: AuditConfig,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        let sandbox_defaults = SandboxConfig::default();
        let sandbox = SandboxConfig {
            image: env_or("SANDBOX_IMAGE", &sandbox_defaults.image),
            sims_path: env::var("SIMS_PATH")
                .map(PathBuf::from)
                .unwrap_or(sandbox_defaults.sims_path),
            workspace_root: env::var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(sandbox_defaults.workspace_root),
            memory_limit_bytes: env::var("SANDBOX_MEMORY_LIMIT")
                .ok()
                .and_then(|v| parse_memory_limit(&v))
                .unwrap_or(sandbox_defaults.memory_limit_bytes),
            cpu_limit_cores: env::var("SANDBOX_CPU_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(sandbox_defaults.cpu_limit_cores),
            network_disabled: env::var("SANDBOX_NETWORK_DISABLED")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(sandbox_defaults.network_disabled),
            timeout: env::var("SANDBOX_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(sandbox_defaults.timeout),
        };

        let audit = AuditConfig {
            enabled: env::var("AUDIT_ENABLED")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            log_path: env::var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs/runs.jsonl")),
            hmac_key: env::var("AUDIT_HMAC_KEY")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| v.into_bytes()),
        };

        Ok(Self {
            redis_url: env_or("REDIS_URL", "redis://localhost:6379/0"),
            job_queue: env_or("JOB_QUEUE", "simulation_jobs"),
            poll_timeout: env::var("POLL_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(5)),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            s3_bucket: env_or("S3_BUCKET", "simproof-artifacts"),
            s3_region: env_or("S3_REGION", "us-east-1"),
            s3_access_key: env::var("S3_ACCESS_KEY").ok().filter(|v| !v.is_empty()),
            s3_secret_key: env::var("S3_SECRET_KEY").ok().filter(|v| !v.is_empty()),
            backend_url: env_or("BACKEND_URL", "http://backend:8000"),
            backend_api_key: env_or("BACKEND_API_KEY", ""),
            callback_min_interval: env::var("CALLBACK_MIN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
            sandbox,
            worker_id: env::var("WORKER_ID")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| format!("worker-{}", std::process::id())),
            audit,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parses docker-style memory limits: `512m`, `2g`, `262144k` or raw bytes.
fn parse_memory_limit(raw: &str) -> Option<u64> {
    let value = raw.trim().to_ascii_lowercase();
    let (digits, multiplier) = match value.strip_suffix(['k', 'm', 'g']) {
        Some(digits) => {
            let multiplier = match value.as_bytes()[value.len() - 1] {
                b'k' => 1024u64,
                b'm' => 1024 * 1024,
                _ => 1024 * 1024 * 1024,
            };
            (digits, multiplier)
        }
        None => (value.as_str(), 1),
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limits_accept_docker_suffixes() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("2G"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1024k"), Some(1024 * 1024));
        assert_eq!(parse_memory_limit("536870912"), Some(536870912));
    }

    #[test]
    fn malformed_memory_limits_are_rejected() {
        assert_eq!(parse_memory_limit("lots"), None);
        assert_eq!(parse_memory_limit("12mb"), None);
        assert_eq!(parse_memory_limit(""), None);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }
}
