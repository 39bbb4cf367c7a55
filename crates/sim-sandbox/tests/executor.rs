//! Executor behavior over a scripted runtime, no Docker required.

use std::path::Path;

use async_trait::async_trait;
use sim_sandbox::{
    ContainerOutcome, ContainerSpec, RuntimeError, SandboxConfig, SandboxManager, SandboxRuntime,
    LOG_CAPTURE_LIMIT,
};
use tokio::fs;

/// Runtime standing in for Docker: writes scripted artifacts into the
/// workspace and returns a scripted outcome.
struct ScriptedRuntime {
    artifacts: Vec<(&'static str, &'static str)>,
    outcome: fn() -> Result<ContainerOutcome, RuntimeError>,
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutcome, RuntimeError> {
        let output = spec.workspace_dir.join("output");
        for (name, contents) in &self.artifacts {
            fs::write(output.join(name), contents).await.unwrap();
        }
        (self.outcome)()
    }
}

fn exit_zero() -> Result<ContainerOutcome, RuntimeError> {
    Ok(ContainerOutcome {
        exit_code: 0,
        stdout: "collected 12 items\n12 passed".to_string(),
        stderr: String::new(),
        timed_out: false,
    })
}

async fn fixture(root: &Path) -> SandboxConfig {
    let sims = root.join("sims");
    fs::create_dir_all(sims.join("bugfix_v1")).await.unwrap();
    fs::write(sims.join("bugfix_v1").join("conftest.py"), "")
        .await
        .unwrap();

    SandboxConfig {
        sims_path: sims,
        workspace_root: root.join("work"),
        ..SandboxConfig::default()
    }
}

fn workspace_leftovers(root: &Path) -> usize {
    match std::fs::read_dir(root.join("work")) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with("simproof-") && !name.starts_with("simproof-artifacts-")
            })
            .count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn successful_run_collects_artifacts_and_removes_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: vec![
            ("metrics.json", r#"{"tests_passed": true}"#),
            ("testlog.txt", "12 passed"),
        ],
        outcome: exit_zero,
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("bugfix_v1", "print('fix')", "# writeup", "r1").await;

    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert!(result.error.is_none());
    assert_eq!(result.artifacts.len(), 2);

    let metrics_path = &result.artifacts["metrics.json"];
    let contents = fs::read_to_string(metrics_path).await.unwrap();
    assert!(contents.contains("tests_passed"));

    assert_eq!(workspace_leftovers(dir.path()), 0);

    result.discard_artifacts().await;
    assert!(!result.artifact_dir.as_ref().unwrap().exists());
}

#[tokio::test]
async fn unexpected_files_in_output_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: vec![("metrics.json", "{}"), ("core.dump", "binary")],
        outcome: exit_zero,
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("bugfix_v1", "", "", "r2").await;

    assert_eq!(result.artifacts.len(), 1);
    assert!(result.artifacts.contains_key("metrics.json"));
    result.discard_artifacts().await;
}

#[tokio::test]
async fn timeout_maps_to_the_structured_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: vec![("metrics.json", "{}")],
        outcome: || {
            Ok(ContainerOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            })
        },
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("bugfix_v1", "", "", "r3").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.error.as_deref(), Some("Execution timed out"));
    assert!(result.artifacts.is_empty());
    assert_eq!(workspace_leftovers(dir.path()), 0);
}

#[tokio::test]
async fn missing_image_surfaces_as_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: Vec::new(),
        outcome: || Err(RuntimeError::ImageMissing("simproof-sandbox:latest".to_string())),
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("bugfix_v1", "", "", "r4").await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("image not found"));
    assert_eq!(workspace_leftovers(dir.path()), 0);
}

#[tokio::test]
async fn unknown_simulation_fails_without_launching() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: Vec::new(),
        outcome: || panic!("runtime must not be invoked"),
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("no_such_sim", "", "", "r5").await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("simulation not found"));
}

#[tokio::test]
async fn nonzero_exit_is_failure_but_keeps_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: vec![("testlog.txt", "1 failed")],
        outcome: || {
            Ok(ContainerOutcome {
                exit_code: 2,
                stdout: String::new(),
                stderr: "AssertionError".to_string(),
                timed_out: false,
            })
        },
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("bugfix_v1", "", "", "r6").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 2);
    assert!(result.error.is_none());
    assert_eq!(result.stderr, "AssertionError");
    assert!(result.artifacts.contains_key("testlog.txt"));
    result.discard_artifacts().await;
}

#[tokio::test]
async fn captured_logs_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let config = fixture(dir.path()).await;
    let runtime = ScriptedRuntime {
        artifacts: Vec::new(),
        outcome: || {
            Ok(ContainerOutcome {
                exit_code: 0,
                stdout: "y".repeat(LOG_CAPTURE_LIMIT * 3),
                stderr: "z".repeat(LOG_CAPTURE_LIMIT + 1),
                timed_out: false,
            })
        },
    };

    let manager = SandboxManager::new(runtime, config);
    let result = manager.execute("bugfix_v1", "", "", "r7").await;

    assert_eq!(result.stdout.chars().count(), LOG_CAPTURE_LIMIT);
    assert_eq!(result.stderr.chars().count(), LOG_CAPTURE_LIMIT);
}
