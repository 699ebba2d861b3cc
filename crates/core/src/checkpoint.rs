//! Resumable sequential batches.
//!
//! A batch walks its units one at a time, waits between external calls and
//! persists the set of completed unit ids after every success. A restarted
//! batch skips what the checkpoint already lists. A unit finished just before
//! a crash may run again, so work functions must be safe to repeat.

use crate::SearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchCheckpoint {
    pub completed: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for BatchCheckpoint {
    fn default() -> Self {
        Self {
            completed: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }
}

impl BatchCheckpoint {
    /// Missing files start a fresh batch. A corrupt file is logged and also
    /// treated as empty, which at worst repeats idempotent work.
    pub async fn load(path: &Path) -> Result<Self, SearchError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Ok(checkpoint),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring unreadable checkpoint");
                Ok(Self::default())
            }
        }
    }

    /// Writes to a sibling temp file and renames it over `path`.
    pub async fn save(&self, path: &Path) -> Result<(), SearchError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = staging_path(path);
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, path).await?;
        debug!(path = %path.display(), completed = self.completed.len(), "checkpoint saved");
        Ok(())
    }

    pub fn is_completed(&self, unit: &str) -> bool {
        self.completed.contains(unit)
    }

    pub fn mark_completed(&mut self, unit: impl Into<String>) {
        self.completed.insert(unit.into());
        self.updated_at = Utc::now();
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub delay: Duration,
    pub checkpoint_path: PathBuf,
}

impl BatchOptions {
    pub fn new(checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            delay: DEFAULT_BATCH_DELAY,
            checkpoint_path: checkpoint_path.into(),
        }
    }
}

#[derive(Debug)]
pub struct BatchReport<T> {
    pub completed: Vec<(String, T)>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, SearchError)>,
}

/// Runs `work` for every unit not already in the checkpoint. Unit failures
/// are collected in the report; only checkpoint I/O aborts the batch.
pub async fn run_batch<T, F, Fut>(
    units: &[String],
    options: &BatchOptions,
    mut work: F,
) -> Result<BatchReport<T>, SearchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, SearchError>>,
{
    let mut checkpoint = BatchCheckpoint::load(&options.checkpoint_path).await?;
    let mut report = BatchReport {
        completed: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };
    let mut called = false;

    for unit in units {
        if checkpoint.is_completed(unit) {
            report.skipped.push(unit.clone());
            continue;
        }

        if called && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
        called = true;

        match work(unit.clone()).await {
            Ok(output) => {
                checkpoint.mark_completed(unit.clone());
                checkpoint.save(&options.checkpoint_path).await?;
                report.completed.push((unit.clone(), output));
            }
            Err(error) => {
                warn!(unit = %unit, %error, "batch unit failed");
                report.failed.push((unit.clone(), error));
            }
        }
    }

    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "batch finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn units(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let checkpoint = BatchCheckpoint::load(&dir.path().join("absent.json"))
            .await
            .expect("load");
        assert!(checkpoint.completed.is_empty());
    }

    #[tokio::test]
    async fn corrupt_checkpoint_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoint.json");
        tokio::fs::write(&path, "{ not json").await.expect("write");

        let checkpoint = BatchCheckpoint::load(&path).await.expect("load");
        assert!(checkpoint.completed.is_empty());
    }

    #[tokio::test]
    async fn saved_checkpoint_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("checkpoint.json");

        let mut checkpoint = BatchCheckpoint::default();
        checkpoint.mark_completed("S2.1");
        checkpoint.save(&path).await.expect("save");

        let reloaded = BatchCheckpoint::load(&path).await.expect("load");
        assert!(reloaded.is_completed("S2.1"));
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn restarted_batch_skips_completed_units() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = BatchOptions {
            delay: Duration::ZERO,
            checkpoint_path: dir.path().join("checkpoint.json"),
        };
        let pages = units(&["A1.0", "A2.0", "S2.1"]);

        let first = run_batch(&pages, &options, |unit| async move {
            if unit == "S2.1" {
                Err(SearchError::NotReady("vision".to_string()))
            } else {
                Ok(unit.len())
            }
        })
        .await
        .expect("batch");
        assert_eq!(first.completed.len(), 2);
        assert_eq!(first.failed.len(), 1);
        assert_eq!(first.failed[0].0, "S2.1");

        let seen = Mutex::new(Vec::new());
        let seen_ref = &seen;
        let second = run_batch(&pages, &options, move |unit| async move {
            seen_ref.lock().expect("seen lock").push(unit.clone());
            Ok(unit)
        })
        .await
        .expect("batch");

        assert_eq!(second.skipped, units(&["A1.0", "A2.0"]));
        assert_eq!(*seen.lock().expect("seen lock"), units(&["S2.1"]));
        let checkpoint = BatchCheckpoint::load(&options.checkpoint_path)
            .await
            .expect("load");
        assert_eq!(checkpoint.completed.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied_between_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = BatchOptions::new(dir.path().join("checkpoint.json"));
        assert_eq!(options.delay, DEFAULT_BATCH_DELAY);

        let started = Instant::now();
        let report = run_batch(&units(&["a", "b", "c"]), &options, |unit| async move {
            Ok::<_, SearchError>(unit)
        })
        .await
        .expect("batch");

        assert_eq!(report.completed.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1_000));
    }
}
