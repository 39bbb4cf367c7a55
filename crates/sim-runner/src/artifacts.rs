//! Artifact persistence and metric parsing.
//!
//! Uploads the sandbox's collected artifact files to the object store under
//! `runs/{run_id}/{name}` and parses the two well-known metric carriers into
//! the typed dictionary the proof engine consumes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use proof_engine::Metrics;
use tracing::{info, warn};

use crate::config::RunnerConfig;

/// Presigned GET URLs stay valid for 7 days.
const PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 86_400);

pub struct ArtifactSink {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ArtifactSink {
    /// Builds the S3 client, honoring an endpoint override and static
    /// credentials for MinIO-compatible stores.
    pub async fn connect(config: &RunnerConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.s3_region.clone()));

        if let (Some(access), Some(secret)) = (&config.s3_access_key, &config.s3_secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "runner-env",
            ));
        }
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.s3_endpoint.is_some() {
            // Path-style addressing; virtual-hosted buckets do not resolve
            // against a single-host MinIO endpoint.
            builder = builder.force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.s3_bucket.clone(),
        }
    }

    /// Uploads each artifact and returns name → presigned URL. Individual
    /// failures are logged and omitted; the batch never aborts.
    pub async fn upload_artifacts(
        &self,
        run_id: &str,
        artifacts: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, String> {
        let mut urls = BTreeMap::new();

        for (name, path) in artifacts {
            let key = object_key(run_id, name);
            match self.upload_one(&key, name, path).await {
                Ok(url) => {
                    info!(run_id, artifact = %name, key = %key, "uploaded artifact");
                    urls.insert(name.clone(), url);
                }
                Err(err) => {
                    warn!(run_id, artifact = %name, error = %err, "failed to upload artifact");
                }
            }
        }

        urls
    }

    async fn upload_one(&self, key: &str, name: &str, path: &Path) -> anyhow::Result<String> {
        let body = ByteStream::from_path(path).await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(name))
            .body(body)
            .send()
            .await?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(PRESIGN_EXPIRY)?)
            .await?;

        Ok(presigned.uri().to_string())
    }
}

pub fn object_key(run_id: &str, name: &str) -> String {
    format!("runs/{run_id}/{name}")
}

/// Content type inferred from the artifact extension.
pub fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".json") {
        "application/json"
    } else if name.ends_with(".xml") {
        "application/xml"
    } else if name.ends_with(".txt") {
        "text/plain"
    } else if name.ends_with(".patch") {
        "text/x-diff"
    } else {
        "application/octet-stream"
    }
}

/// Parses the metric carriers among the collected artifacts.
///
/// `metrics.json` supplies the base dictionary; `grader_output.json`'s
/// `metrics` subtree is shallow-merged on top and wins on conflicts. Missing
/// files yield an empty dictionary; malformed JSON is logged and skipped so a
/// metrics-less job still completes (its claims go unproved downstream).
pub async fn parse_metrics(artifacts: &BTreeMap<String, PathBuf>) -> Metrics {
    let mut metrics = Metrics::new();

    if let Some(path) = artifacts.get("metrics.json") {
        match read_json_object(path).await {
            Ok(object) => {
                let (parsed, skipped) = Metrics::from_json_object(&object);
                log_skipped("metrics.json", &skipped);
                metrics = parsed;
            }
            Err(err) => warn!(error = %err, "failed to parse metrics.json"),
        }
    }

    if let Some(path) = artifacts.get("grader_output.json") {
        match read_json_object(path).await {
            Ok(object) => {
                if let Some(subtree) = object.get("metrics").and_then(|v| v.as_object()) {
                    let (parsed, skipped) = Metrics::from_json_object(subtree);
                    log_skipped("grader_output.json", &skipped);
                    metrics.merge_from(parsed);
                }
            }
            Err(err) => warn!(error = %err, "failed to parse grader_output.json"),
        }
    }

    metrics
}

async fn read_json_object(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("top-level JSON value is not an object"))
}

fn log_skipped(source: &str, keys: &[String]) {
    if !keys.is_empty() {
        warn!(source, keys = ?keys, "skipped non-scalar metric values");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proof_engine::Lookup;

    async fn write_artifact(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[test]
    fn object_keys_follow_the_run_layout() {
        assert_eq!(object_key("run_42", "diff.patch"), "runs/run_42/diff.patch");
    }

    #[test]
    fn content_types_cover_the_closed_artifact_set() {
        assert_eq!(content_type_for("metrics.json"), "application/json");
        assert_eq!(content_type_for("coverage.xml"), "application/xml");
        assert_eq!(content_type_for("testlog.txt"), "text/plain");
        assert_eq!(content_type_for("diff.patch"), "text/x-diff");
        assert_eq!(content_type_for("weird.bin"), "application/octet-stream");
    }

    #[tokio::test]
    async fn grader_metrics_win_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            "metrics.json".to_string(),
            write_artifact(
                dir.path(),
                "metrics.json",
                r#"{"tests_passed": false, "tests_added_count": 1}"#,
            )
            .await,
        );
        artifacts.insert(
            "grader_output.json".to_string(),
            write_artifact(
                dir.path(),
                "grader_output.json",
                r#"{"verdict": "green", "metrics": {"tests_passed": true}}"#,
            )
            .await,
        );

        let metrics = parse_metrics(&artifacts).await;
        assert_eq!(metrics.flag("tests_passed"), Lookup::Found(true));
        assert_eq!(metrics.count("tests_added_count"), Lookup::Found(1));
    }

    #[tokio::test]
    async fn grader_output_alone_supplies_the_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            "grader_output.json".to_string(),
            write_artifact(
                dir.path(),
                "grader_output.json",
                r#"{"metrics": {"time_to_green_seconds": 1800}}"#,
            )
            .await,
        );

        let metrics = parse_metrics(&artifacts).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(
            metrics.number("time_to_green_seconds"),
            Lookup::Found(1800.0)
        );
    }

    #[tokio::test]
    async fn malformed_metrics_yield_an_empty_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            "metrics.json".to_string(),
            write_artifact(dir.path(), "metrics.json", "{not json").await,
        );

        let metrics = parse_metrics(&artifacts).await;
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn no_metric_artifacts_yield_an_empty_dictionary() {
        let metrics = parse_metrics(&BTreeMap::new()).await;
        assert!(metrics.is_empty());
    }
}
