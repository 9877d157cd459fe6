// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Concurrent batch processing
//!
//! Each file runs through fingerprint, cache lookup, analysis on a miss,
//! cache store, rename, then metadata embed and sidecar. A bounded pool of
//! workers processes files independently: whatever goes wrong with one file
//! ends up in that file's [`FileOutcome`] and never touches its siblings.

mod outcome;

pub use outcome::{tasks_for, BatchReport, BatchSettings, FileOutcome, FileTask, TaskOptions};

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analyzer::{content_type_for, AnalysisResult, Analyzer};
use crate::cache::ResultCache;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::metadata::{write_sidecar, ExifToolEmbedder, MetadataEmbedder};
use crate::rename::RenameResolver;
use crate::{ArgusError, Result};

/// Raises the stop signal
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

/// Observed by the coordinator before each task starts
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

/// Create a connected stop handle and signal
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(Arc::new(tx)), StopSignal(rx))
}

impl StopHandle {
    /// Stop starting new tasks; running ones finish
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// Runs batches of files through the analysis pipeline
pub struct BatchCoordinator {
    analyzer: Arc<dyn Analyzer>,
    cache: Option<ResultCache>,
    embedder: Arc<dyn MetadataEmbedder>,
    stop: Option<StopSignal>,
}

/// State shared by the workers of one batch
struct Worker {
    analyzer: Arc<dyn Analyzer>,
    cache: Option<ResultCache>,
    embedder: Arc<dyn MetadataEmbedder>,
    resolver: Arc<RenameResolver>,
}

impl BatchCoordinator {
    pub fn new(analyzer: Arc<dyn Analyzer>, cache: Option<ResultCache>) -> Self {
        Self {
            analyzer,
            cache,
            embedder: Arc::new(ExifToolEmbedder::default()),
            stop: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn MetadataEmbedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Process every task and return exactly one outcome per task
    ///
    /// Only invalid settings fail the batch as a whole.
    pub async fn run(&self, tasks: Vec<FileTask>, settings: BatchSettings) -> Result<BatchReport> {
        if settings.max_workers < 1 {
            return Err(ArgusError::Config("max_workers must be at least 1".to_string()));
        }

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = tasks.len();
        info!(
            "Batch {}: {} files, {} workers, analyzer {}",
            batch_id,
            total,
            settings.max_workers,
            self.analyzer.identity()
        );

        let worker = Arc::new(Worker {
            analyzer: self.analyzer.clone(),
            cache: self.cache.clone(),
            embedder: self.embedder.clone(),
            resolver: Arc::new(RenameResolver::new()),
        });
        let permits = Arc::new(Semaphore::new(settings.max_workers));
        let mut running = JoinSet::new();
        let mut outcomes = Vec::with_capacity(total);
        let mut pending = HashSet::with_capacity(total);
        let mut seen = HashSet::with_capacity(total);

        for task in tasks {
            // `a.txt` and `sub/../a.txt` are the same file
            let key = std::fs::canonicalize(&task.path).unwrap_or_else(|_| task.path.clone());
            if !seen.insert(key) || !pending.insert(task.path.clone()) {
                warn!("Skipping duplicate path in batch: {:?}", task.path);
                outcomes.push(FileOutcome::failed(task.path, "duplicate path in batch"));
                continue;
            }

            let worker = worker.clone();
            let permits = permits.clone();
            let stop = self.stop.clone();
            let delay = settings.rate_limit_delay;

            running.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return FileOutcome::failed(task.path, "worker pool closed");
                };
                if stop.as_ref().is_some_and(StopSignal::is_stopped) {
                    debug!("Stop requested, not starting {:?}", task.path);
                    return FileOutcome::failed(task.path, "cancelled before start");
                }

                let path = task.path.clone();
                let outcome = match tokio::spawn(async move { worker.process(task).await }).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Worker for {:?} crashed: {}", path, e);
                        FileOutcome::failed(path, format!("worker crashed: {}", e))
                    }
                };

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                outcome
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(&outcome.path);
                    outcomes.push(outcome);
                }
                Err(e) => error!("Batch task lost: {}", e),
            }
        }

        // Anything still pending lost its task without reporting
        for path in pending {
            outcomes.push(FileOutcome::failed(path, "worker lost"));
        }

        let report = BatchReport::new(batch_id, started_at, clock.elapsed(), outcomes);
        info!(
            "Batch {} done: {} succeeded ({} degraded), {} failed in {:.2}s",
            batch_id,
            report.succeeded(),
            report.degraded(),
            report.failed(),
            report.elapsed_secs
        );
        Ok(report)
    }
}

impl Worker {
    async fn process(&self, task: FileTask) -> FileOutcome {
        let FileTask { path, options } = task;
        info!("Processing: {:?}", path);
        let mut outcome = FileOutcome::new(path.clone());

        let fp = match blocking({
            let path = path.clone();
            move || fingerprint(&path)
        })
        .await
        {
            Ok(fp) => fp,
            Err(e) => {
                error!("Cannot fingerprint {:?}: {}", path, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let (result, cache_hit) = self.analysis_for(&path, fp).await;
        outcome.cache_hit = cache_hit;
        outcome.degraded = result.is_degraded();

        let mut current = path.clone();
        if options.rename {
            if let Some(suggested) = result.suggested_filename.clone() {
                let resolver = self.resolver.clone();
                let from = current.clone();
                let renamed = blocking(move || resolver.rename(&from, &suggested, options.dry_run)).await;

                match renamed {
                    Ok(Some(dest)) => {
                        if !options.dry_run {
                            current = dest.clone();
                        }
                        outcome.final_path = Some(dest);
                    }
                    Ok(None) => debug!("Keeping name of {:?}", path),
                    Err(e) => {
                        error!("Rename failed for {:?}: {}", path, e);
                        outcome.error = Some(e.to_string());
                        outcome.result = Some(result);
                        return outcome;
                    }
                }
            }
        }

        if !options.dry_run {
            if options.embed_metadata {
                match self.embedder.embed(&current, &result).await {
                    Ok(true) => debug!("Embedded metadata into {:?}", current),
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Metadata embed failed for {:?}: {}", current, e);
                        outcome.warnings.push(format!("metadata embed: {}", e));
                    }
                }
            }

            if options.write_sidecar {
                let target = current.clone();
                let payload = result.clone();
                if let Err(e) = blocking(move || write_sidecar(&target, &payload)).await {
                    warn!("Sidecar write failed for {:?}: {}", current, e);
                    outcome.warnings.push(format!("sidecar: {}", e));
                }
            }
        }

        outcome.result = Some(result);
        outcome.success = true;
        info!("Completed: {:?}", outcome.current_path());
        outcome
    }

    /// Cached result, fresh analysis, or a degraded placeholder
    async fn analysis_for(&self, path: &Path, fp: Fingerprint) -> (AnalysisResult, bool) {
        let analyzer_id = self.analyzer.identity().to_string();

        if let Some(cache) = &self.cache {
            let cache = cache.clone();
            let id = analyzer_id.clone();
            let hit = blocking(move || Ok(cache.get(&fp, &id))).await.unwrap_or_else(|e| {
                warn!("Cache lookup task failed: {}", e);
                None
            });
            if let Some(result) = hit {
                debug!("Using cached analysis for {:?}", path);
                return (result, true);
            }
        }

        let content_type = content_type_for(path);
        match self.analyzer.analyze(path, content_type).await {
            Ok(mut result) => {
                result.stamp(content_type, fp, &analyzer_id);
                if let Some(cache) = &self.cache {
                    let cache = cache.clone();
                    let payload = result.clone();
                    let id = analyzer_id.clone();
                    if let Err(e) = blocking(move || cache.set(&fp, &id, &payload)).await {
                        warn!("Failed to cache analysis of {:?}: {}", path, e);
                    }
                }
                (result, false)
            }
            Err(e) => {
                warn!("Analysis failed for {:?}, using degraded result: {}", path, e);
                let mut result = AnalysisResult::degraded(path, content_type, &analyzer_id, &e.to_string());
                result.fingerprint = Some(fp);
                (result, false)
            }
        }
    }
}

/// Run blocking file or database work off the async worker threads
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArgusError::Worker(e.to_string()))?
}
