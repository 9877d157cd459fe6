// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch inputs, per-file outcomes and the aggregated report

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::analyzer::AnalysisResult;
use crate::Result;

/// What to do with each file once it has been analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    pub rename: bool,
    pub dry_run: bool,
    pub embed_metadata: bool,
    pub write_sidecar: bool,
}

/// One file to process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub path: PathBuf,
    pub options: TaskOptions,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>, options: TaskOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }
}

/// Build one task per path sharing the same options
pub fn tasks_for<I, P>(paths: I, options: TaskOptions) -> Vec<FileTask>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    paths.into_iter().map(|p| FileTask::new(p, options)).collect()
}

/// Worker pool sizing and throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Concurrent workers, at least 1
    pub max_workers: usize,
    /// Pause after each file before its worker takes the next one
    pub rate_limit_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            rate_limit_delay: Duration::from_secs(1),
        }
    }
}

/// Result of processing one file
///
/// `success` means the pipeline completed. A file whose analysis failed
/// still succeeds with `degraded` set and a placeholder result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// New location after rename, or the would-be location in dry-run mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub degraded: bool,
    /// Non-fatal problems (metadata embed, sidecar)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl FileOutcome {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            success: false,
            error: None,
            final_path: None,
            result: None,
            cache_hit: false,
            degraded: false,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn failed(path: PathBuf, error: impl ToString) -> Self {
        let mut outcome = Self::new(path);
        outcome.error = Some(error.to_string());
        outcome
    }

    /// Path the file lives at after processing
    pub fn current_path(&self) -> &Path {
        self.final_path.as_deref().unwrap_or(&self.path)
    }
}

/// Everything a batch produced, in completion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub(crate) fn new(batch_id: Uuid, started_at: DateTime<Utc>, elapsed: Duration, outcomes: Vec<FileOutcome>) -> Self {
        Self {
            batch_id,
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            outcomes,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn degraded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.degraded).count()
    }

    pub fn cache_hits(&self) -> usize {
        self.outcomes.iter().filter(|o| o.cache_hit).count()
    }

    pub fn outcome_for(&self, path: &Path) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| o.path == path)
    }

    /// Write the report as `argus_results_<timestamp>.json` inside `dir`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let stamp = self.started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("argus_results_{}.json", stamp));
        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}
