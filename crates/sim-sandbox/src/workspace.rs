//! Per-run workspace lifecycle.
//!
//! A workspace is exclusive to one run and must disappear on every exit
//! path, including panics in the caller. The `Drop` impl is the backstop;
//! the async `remove` is preferred so removal errors can be surfaced.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

/// Isolated directory tree holding one run's inputs and outputs:
/// `sim/` (simulation copy), `submission/{code.py,writeup.md}`, `output/`.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Materializes a fresh workspace under `base` for the given run.
    ///
    /// Tolerates partial construction: if any step fails, whatever was
    /// created is removed before the error propagates.
    pub async fn create(
        base: &Path,
        run_id: &str,
        sim_dir: &Path,
        candidate_code: &str,
        candidate_writeup: &str,
    ) -> Result<Self> {
        let root = base.join(format!(
            "simproof-{}-{}",
            sanitize_component(run_id),
            Uuid::new_v4().simple()
        ));

        let workspace = Self {
            root: root.clone(),
            removed: false,
        };

        match Self::populate(&root, sim_dir, candidate_code, candidate_writeup).await {
            Ok(()) => Ok(workspace),
            Err(err) => {
                if let Err(cleanup_err) = workspace.remove().await {
                    warn!(
                        workspace = %root.display(),
                        error = %cleanup_err,
                        "failed to remove partially constructed workspace"
                    );
                }
                Err(err)
            }
        }
    }

    async fn populate(
        root: &Path,
        sim_dir: &Path,
        candidate_code: &str,
        candidate_writeup: &str,
    ) -> Result<()> {
        fs::create_dir_all(root)
            .await
            .with_context(|| format!("creating workspace at {}", root.display()))?;

        copy_dir_recursive(sim_dir, &root.join("sim"))
            .await
            .with_context(|| format!("copying simulation from {}", sim_dir.display()))?;

        let submission = root.join("submission");
        fs::create_dir_all(&submission)
            .await
            .context("creating submission directory")?;
        fs::write(submission.join("code.py"), candidate_code)
            .await
            .context("writing candidate code")?;
        fs::write(submission.join("writeup.md"), candidate_writeup)
            .await
            .context("writing candidate writeup")?;

        fs::create_dir_all(root.join("output"))
            .await
            .context("creating output directory")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Removes the workspace tree, consuming the handle.
    pub async fn remove(mut self) -> Result<()> {
        self.removed = true;
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing workspace {}", self.root.display()))
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Backstop for caller panics only; every ordinary path goes through
        // `remove`. The tree can hold a full simulation copy, so removal
        // must stay off the async workers.
        let root = std::mem::take(&mut self.root);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_tree_sync(&root));
            }
            Err(_) => remove_tree_sync(&root),
        }
    }
}

fn remove_tree_sync(root: &Path) {
    if let Err(err) = std::fs::remove_dir_all(root) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(workspace = %root.display(), error = %err, "failed to remove workspace");
        }
    }
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

fn copy_dir_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dst)
            .await
            .with_context(|| format!("creating {}", dst.display()))?;

        let mut entries = fs::read_dir(src)
            .await
            .with_context(|| format!("reading {}", src.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &target).await?;
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target)
                    .await
                    .with_context(|| format!("copying {}", entry.path().display()))?;
            }
            // Symlinks in simulation content are skipped; the sandbox sees
            // only regular files.
        }

        Ok(())
    })
}
