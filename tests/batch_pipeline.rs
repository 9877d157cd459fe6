// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end batch runs against a scripted analyzer

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use argus::analyzer::{parse_response, AnalysisResult, Analyzer};
use argus::batch::{stop_signal, tasks_for, BatchCoordinator, BatchSettings, StopHandle, TaskOptions};
use argus::cache::ResultCache;
use argus::metadata::{sidecar_path, MetadataEmbedder, NoopEmbedder};
use argus::{ArgusError, Result};

/// Suggests a name per file stem; stems starting with `bad` fail
#[derive(Default)]
struct Scripted {
    names: HashMap<String, String>,
    calls: AtomicUsize,
    stop_on_call: Option<StopHandle>,
}

impl Scripted {
    fn suggesting(pairs: &[(&str, &str)]) -> Self {
        Self {
            names: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for Scripted {
    fn identity(&self) -> &str {
        "scripted:v1"
    }

    async fn analyze(&self, path: &Path, content_type: &str) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = &self.stop_on_call {
            handle.stop();
        }

        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        if stem.starts_with("bad") {
            return Err(ArgusError::Analysis(format!("model refused {}", stem)));
        }

        let mut body = serde_json::json!({
            "title": stem,
            "description": format!("a {} file", content_type),
            "category": "document",
            "tags": ["work"],
        });
        if let Some(name) = self.names.get(&stem) {
            body["suggested_filename"] = serde_json::Value::String(name.clone());
        }
        let mut result = parse_response(&body.to_string())?;
        // Backends that fill in bookkeeping fields themselves
        if stem.starts_with("noisy") {
            result.error = Some("none".to_string());
            result.analyzer_id = "someone-else".to_string();
        }
        Ok(result)
    }
}

/// Records when each analysis started on the tokio clock
#[derive(Default)]
struct Timed {
    starts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl Analyzer for Timed {
    fn identity(&self) -> &str {
        "timed:v1"
    }

    async fn analyze(&self, _path: &Path, _content_type: &str) -> Result<AnalysisResult> {
        self.starts.lock().unwrap().push(Instant::now());
        parse_response(r#"{"title": "t"}"#)
    }
}

struct FailingEmbedder;

#[async_trait]
impl MetadataEmbedder for FailingEmbedder {
    async fn embed(&self, _path: &Path, _result: &AnalysisResult) -> Result<bool> {
        Err(ArgusError::Embed("tag write refused".to_string()))
    }
}

fn settings(max_workers: usize) -> BatchSettings {
    BatchSettings {
        max_workers,
        rate_limit_delay: Duration::ZERO,
    }
}

fn analyze_only() -> TaskOptions {
    TaskOptions::default()
}

fn touch_all(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| {
            let p = dir.join(n);
            std::fs::write(&p, format!("contents of {}", n)).unwrap();
            p
        })
        .collect()
}

fn coordinator(analyzer: Arc<Scripted>, cache: Option<ResultCache>) -> BatchCoordinator {
    BatchCoordinator::new(analyzer, cache).with_embedder(Arc::new(NoopEmbedder))
}

#[tokio::test]
async fn every_task_gets_exactly_one_outcome() {
    let dir = TempDir::new().unwrap();
    let mut paths = touch_all(dir.path(), &["a.txt", "b.txt", "bad_c.txt", "d.txt", "bad_e.txt"]);
    paths.push(dir.path().join("missing.txt"));
    let cache = ResultCache::in_memory().unwrap();

    let report = coordinator(Arc::new(Scripted::default()), Some(cache.clone()))
        .run(tasks_for(paths.clone(), analyze_only()), settings(3))
        .await
        .unwrap();

    assert_eq!(report.total(), paths.len());
    let reported: HashSet<_> = report.outcomes.iter().map(|o| o.path.clone()).collect();
    assert_eq!(reported, paths.iter().cloned().collect());

    // Degraded analyses complete the pipeline but are never cached
    assert_eq!(report.succeeded(), 5);
    assert_eq!(report.degraded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(cache.len().unwrap(), 3);
}

#[tokio::test]
async fn analyzer_failure_degrades_only_that_file() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["good.txt", "bad_one.pdf"]);

    let report = coordinator(Arc::new(Scripted::default()), None)
        .run(tasks_for(paths.clone(), analyze_only()), settings(2))
        .await
        .unwrap();

    let good = report.outcome_for(&paths[0]).unwrap();
    assert!(good.success && !good.degraded);
    assert_eq!(good.result.as_ref().unwrap().category, "document");

    let bad = report.outcome_for(&paths[1]).unwrap();
    assert!(bad.success);
    assert!(bad.degraded);
    let result = bad.result.as_ref().unwrap();
    assert_eq!(result.category, "other");
    assert_eq!(result.title, "bad_one");
    assert!(result.description.starts_with("Error analyzing file:"));
    assert!(result.tags.is_empty());
    assert_eq!(result.content_type, "application/pdf");
    assert!(result.fingerprint.is_some());
}

#[tokio::test]
async fn unreadable_file_fails_without_analysis() {
    let dir = TempDir::new().unwrap();
    let analyzer = Arc::new(Scripted::default());
    let missing = dir.path().join("gone.txt");

    let report = coordinator(analyzer.clone(), None)
        .run(tasks_for([missing.clone()], analyze_only()), settings(1))
        .await
        .unwrap();

    let outcome = report.outcome_for(&missing).unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert!(outcome.result.is_none());
    assert_eq!(analyzer.calls(), 0);
}

#[tokio::test]
async fn colliding_suggestions_get_numbered_names() {
    let dir = TempDir::new().unwrap();
    let existing = touch_all(dir.path(), &["report.txt"]).remove(0);
    let paths = touch_all(dir.path(), &["scan_001.txt", "scan_002.txt"]);
    let analyzer = Arc::new(Scripted::suggesting(&[("scan_001", "report"), ("scan_002", "report")]));
    let options = TaskOptions {
        rename: true,
        ..Default::default()
    };

    let report = coordinator(analyzer, None)
        .run(tasks_for(paths.clone(), options), settings(4))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    let finals: HashSet<_> = report.outcomes.iter().filter_map(|o| o.final_path.clone()).collect();
    let expected: HashSet<_> = [dir.path().join("report_1.txt"), dir.path().join("report_2.txt")]
        .into_iter()
        .collect();
    assert_eq!(finals, expected);

    for p in &expected {
        assert!(p.exists());
    }
    for p in &paths {
        assert!(!p.exists());
    }
    assert_eq!(std::fs::read_to_string(existing).unwrap(), "contents of report.txt");
}

#[tokio::test]
async fn matching_suggestion_keeps_the_file() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["invoice.pdf"]);
    let analyzer = Arc::new(Scripted::suggesting(&[("invoice", "invoice")]));
    let options = TaskOptions {
        rename: true,
        ..Default::default()
    };

    let report = coordinator(analyzer, None)
        .run(tasks_for(paths.clone(), options), settings(1))
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.success);
    assert_eq!(outcome.final_path, None);
    assert!(paths[0].exists());
}

#[tokio::test]
async fn dry_run_reports_but_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["img_1.jpg", "img_2.jpg"]);
    let analyzer = Arc::new(Scripted::suggesting(&[("img_1", "beach"), ("img_2", "beach")]));
    let options = TaskOptions {
        rename: true,
        dry_run: true,
        embed_metadata: true,
        write_sidecar: true,
    };
    let before: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();

    let report = BatchCoordinator::new(analyzer, None)
        .with_embedder(Arc::new(FailingEmbedder))
        .run(tasks_for(paths.clone(), options), settings(2))
        .await
        .unwrap();

    let finals: HashSet<_> = report.outcomes.iter().filter_map(|o| o.final_path.clone()).collect();
    let expected: HashSet<_> = [dir.path().join("beach.jpg"), dir.path().join("beach_1.jpg")]
        .into_iter()
        .collect();
    assert_eq!(finals, expected);

    let after: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(before.len(), after.len());
    for p in &paths {
        assert!(p.exists());
        assert!(!sidecar_path(p).exists());
    }
    assert!(report.outcomes.iter().all(|o| o.warnings.is_empty()));
}

#[tokio::test]
async fn sidecar_and_embed_problems_are_warnings() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["draft.md"]);
    let analyzer = Arc::new(Scripted::suggesting(&[("draft", "final notes")]));
    let options = TaskOptions {
        rename: true,
        dry_run: false,
        embed_metadata: true,
        write_sidecar: true,
    };

    let report = BatchCoordinator::new(analyzer, None)
        .with_embedder(Arc::new(FailingEmbedder))
        .run(tasks_for(paths, options), settings(1))
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    let renamed = dir.path().join("final notes.md");
    assert!(outcome.success);
    assert_eq!(outcome.final_path.as_deref(), Some(renamed.as_path()));
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("tag write refused"));

    let sidecar: AnalysisResult =
        serde_json::from_str(&std::fs::read_to_string(sidecar_path(&renamed)).unwrap()).unwrap();
    assert_eq!(&sidecar, outcome.result.as_ref().unwrap());
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["a.txt", "b.txt", "bad_c.txt"]);
    let cache = ResultCache::open(dir.path().join("cache.db"), 2).unwrap();
    let analyzer = Arc::new(Scripted::default());
    let coordinator = coordinator(analyzer.clone(), Some(cache.clone()));

    let first = coordinator
        .run(tasks_for(paths.clone(), analyze_only()), settings(2))
        .await
        .unwrap();
    assert_eq!(first.cache_hits(), 0);
    assert_eq!(analyzer.calls(), 3);

    let second = coordinator
        .run(tasks_for(paths.clone(), analyze_only()), settings(2))
        .await
        .unwrap();
    assert_eq!(second.cache_hits(), 2);
    // The degraded file is retried
    assert_eq!(analyzer.calls(), 4);

    let a_first = first.outcome_for(&paths[0]).unwrap().result.clone().unwrap();
    let a_second = second.outcome_for(&paths[0]).unwrap().result.clone().unwrap();
    assert_eq!(a_first, a_second);
}

#[tokio::test]
async fn cache_contents_do_not_depend_on_worker_count() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..24)
        .map(|i| if i % 5 == 0 { format!("bad_{:02}.txt", i) } else { format!("file_{:02}.txt", i) })
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let paths = touch_all(dir.path(), &name_refs);

    let mut snapshots = Vec::new();
    for workers in [1, 4, 16] {
        let cache = ResultCache::open(dir.path().join(format!("cache_{}.db", workers)), workers).unwrap();
        let report = coordinator(Arc::new(Scripted::default()), Some(cache.clone()))
            .run(tasks_for(paths.clone(), analyze_only()), settings(workers))
            .await
            .unwrap();
        assert_eq!(report.total(), paths.len());

        let snapshot: Vec<_> = cache
            .entries()
            .unwrap()
            .into_iter()
            .map(|mut e| {
                e.payload.analyzed_at = Default::default();
                (e.fingerprint, e.analyzer_id, e.payload)
            })
            .collect();
        snapshots.push(snapshot);
        cache.close().unwrap();
    }

    assert_eq!(snapshots[0].len(), 19);
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[1], snapshots[2]);
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let err = coordinator(Arc::new(Scripted::default()), None)
        .run(Vec::new(), settings(0))
        .await
        .unwrap_err();
    assert!(matches!(err, ArgusError::Config(_)));
}

#[tokio::test]
async fn duplicate_paths_run_once() {
    let dir = TempDir::new().unwrap();
    let path = touch_all(dir.path(), &["twice.txt"]).remove(0);
    let analyzer = Arc::new(Scripted::default());

    let report = coordinator(analyzer.clone(), None)
        .run(tasks_for([path.clone(), path.clone()], analyze_only()), settings(2))
        .await
        .unwrap();

    assert_eq!(report.total(), 2);
    assert_eq!(report.succeeded(), 1);
    assert!(report
        .outcomes
        .iter()
        .any(|o| o.error.as_deref() == Some("duplicate path in batch")));
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test]
async fn stop_lets_running_file_finish_and_skips_the_rest() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["a.txt", "b.txt", "c.txt", "d.txt"]);
    let (handle, signal) = stop_signal();
    let analyzer = Arc::new(Scripted {
        stop_on_call: Some(handle),
        ..Default::default()
    });

    let report = coordinator(analyzer.clone(), None)
        .with_stop_signal(signal)
        .run(tasks_for(paths.clone(), analyze_only()), settings(1))
        .await
        .unwrap();

    assert_eq!(report.total(), 4);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(analyzer.calls(), 1);
    let cancelled = report
        .outcomes
        .iter()
        .filter(|o| o.error.as_deref() == Some("cancelled before start"))
        .count();
    assert_eq!(cancelled, 3);
}

#[tokio::test]
async fn backend_supplied_error_field_is_not_degraded() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["noisy_scan.pdf"]);
    let cache = ResultCache::in_memory().unwrap();
    let analyzer = Arc::new(Scripted::default());
    let coordinator = coordinator(analyzer.clone(), Some(cache.clone()));

    let first = coordinator
        .run(tasks_for(paths.clone(), analyze_only()), settings(1))
        .await
        .unwrap();
    let outcome = &first.outcomes[0];
    assert!(outcome.success && !outcome.degraded);
    let result = outcome.result.as_ref().unwrap();
    assert_eq!(result.error, None);
    assert_eq!(result.analyzer_id, "scripted:v1");
    assert_eq!(cache.len().unwrap(), 1);

    let second = coordinator
        .run(tasks_for(paths, analyze_only()), settings(1))
        .await
        .unwrap();
    assert!(second.outcomes[0].cache_hit);
    assert!(!second.outcomes[0].degraded);
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test]
async fn same_file_through_different_spellings_runs_once() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let path = touch_all(dir.path(), &["a.txt"]).remove(0);
    let detour = dir.path().join("sub").join("..").join("a.txt");
    let analyzer = Arc::new(Scripted::suggesting(&[("a", "renamed")]));
    let options = TaskOptions {
        rename: true,
        ..Default::default()
    };

    let report = coordinator(analyzer.clone(), None)
        .run(tasks_for([path, detour], options), settings(2))
        .await
        .unwrap();

    assert_eq!(report.total(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(analyzer.calls(), 1);
    assert!(report
        .outcomes
        .iter()
        .any(|o| o.error.as_deref() == Some("duplicate path in batch")));
    assert!(dir.path().join("renamed.txt").exists());
}

#[tokio::test(start_paused = true)]
async fn worker_holds_its_slot_through_the_rate_limit_delay() {
    let dir = TempDir::new().unwrap();
    let paths = touch_all(dir.path(), &["a.txt", "b.txt", "c.txt"]);
    let delay = Duration::from_secs(10);

    let analyzer = Arc::new(Timed::default());
    let started = Instant::now();
    let report = BatchCoordinator::new(analyzer.clone(), None)
        .with_embedder(Arc::new(NoopEmbedder))
        .run(
            tasks_for(paths.clone(), analyze_only()),
            BatchSettings {
                max_workers: 1,
                rate_limit_delay: delay,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 3);
    assert!(started.elapsed() >= delay * 3);
    let mut starts = analyzer.starts.lock().unwrap().clone();
    starts.sort();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= delay);
    }

    // Two slots: the third file waits for one of them to finish its pause
    let analyzer = Arc::new(Timed::default());
    BatchCoordinator::new(analyzer.clone(), None)
        .with_embedder(Arc::new(NoopEmbedder))
        .run(
            tasks_for(paths, analyze_only()),
            BatchSettings {
                max_workers: 2,
                rate_limit_delay: delay,
            },
        )
        .await
        .unwrap();
    let mut starts = analyzer.starts.lock().unwrap().clone();
    starts.sort();
    assert!(starts[2] - starts[0] >= delay);
}
