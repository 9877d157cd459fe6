// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Writing analysis results back: embedded tags and JSON sidecars

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::analyzer::AnalysisResult;
use crate::{ArgusError, Result};

/// Embeds analysis fields into a file's own metadata
#[async_trait]
pub trait MetadataEmbedder: Send + Sync {
    /// Returns `Ok(false)` when embedding is unavailable for this file
    async fn embed(&self, path: &Path, result: &AnalysisResult) -> Result<bool>;
}

/// Embeds via the `exiftool` command line tool
#[derive(Debug, Clone)]
pub struct ExifToolEmbedder {
    program: String,
}

impl Default for ExifToolEmbedder {
    fn default() -> Self {
        Self {
            program: "exiftool".to_string(),
        }
    }
}

impl ExifToolEmbedder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("-ver")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Build exiftool tag arguments for a result
pub fn exiftool_args(result: &AnalysisResult) -> Vec<String> {
    let mut args = vec!["-overwrite_original".to_string()];

    if !result.title.is_empty() {
        args.push(format!("-Title={}", result.title));
    }
    if !result.description.is_empty() {
        args.push(format!("-Description={}", result.description));
    }
    if !result.tags.is_empty() {
        args.push(format!("-Keywords={}", result.tags.join(", ")));
    }
    if let Some(author) = &result.author {
        args.push(format!("-Author={}", author));
    }
    if let Some(subject) = &result.subject {
        args.push(format!("-Subject={}", subject));
    }

    args
}

#[async_trait]
impl MetadataEmbedder for ExifToolEmbedder {
    async fn embed(&self, path: &Path, result: &AnalysisResult) -> Result<bool> {
        if !self.available().await {
            debug!("{} not available, skipping metadata embed", self.program);
            return Ok(false);
        }

        let output = Command::new(&self.program)
            .args(exiftool_args(result))
            .arg(path)
            .output()
            .await
            .map_err(|e| ArgusError::io(path, e))?;

        if output.status.success() {
            Ok(true)
        } else {
            Err(ArgusError::Embed(format!(
                "{} failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Embedder that never touches files
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmbedder;

#[async_trait]
impl MetadataEmbedder for NoopEmbedder {
    async fn embed(&self, _path: &Path, _result: &AnalysisResult) -> Result<bool> {
        Ok(false)
    }
}

/// Sidecar path for a file: `photo.jpg` -> `photo.jpg.json`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Write the result as pretty JSON next to the file
pub fn write_sidecar(path: &Path, result: &AnalysisResult) -> Result<PathBuf> {
    let sidecar = sidecar_path(path);
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(&sidecar, json).map_err(|e| ArgusError::io(&sidecar, e))?;
    debug!("Created sidecar {:?}", sidecar);
    Ok(sidecar)
}
