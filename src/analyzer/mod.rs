// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Content analyzers backed by local or remote AI models

pub mod gemini;
pub mod ollama;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::config::{AppConfig, Backend};
use crate::fingerprint::Fingerprint;
use crate::{ArgusError, Result};

pub use gemini::GeminiAnalyzer;
pub use ollama::OllamaAnalyzer;
pub use retry::Retrying;

/// Bytes of textual content included in the prompt
pub const PREVIEW_BYTES: usize = 10_000;

/// Structured result of analyzing one file
///
/// The cache stores this as opaque JSON. Only the batch pipeline reads
/// specific fields (`category`, `suggested_filename`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default)]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub analyzer_id: String,
    #[serde(default = "Utc::now")]
    pub analyzed_at: DateTime<Utc>,
    /// Set only on degraded results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Fields the backend returned that Argus does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_category() -> String {
    "other".to_string()
}

impl AnalysisResult {
    /// Placeholder result used when the analyzer fails
    pub fn degraded(path: &Path, content_type: &str, analyzer_id: &str, cause: &str) -> Self {
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            title,
            description: format!("Error analyzing file: {}", cause),
            category: default_category(),
            tags: Vec::new(),
            suggested_filename: None,
            subject: None,
            date: None,
            author: None,
            content_type: content_type.to_string(),
            fingerprint: None,
            analyzer_id: analyzer_id.to_string(),
            analyzed_at: Utc::now(),
            error: Some(cause.to_string()),
            extra: serde_json::Map::new(),
        }
    }

    /// Whether this is a degraded placeholder
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// Fill in the bookkeeping fields owned by the pipeline
    ///
    /// Overwrites whatever the backend put there; a stamped result is never
    /// degraded.
    pub fn stamp(&mut self, content_type: &str, fingerprint: Fingerprint, analyzer_id: &str) {
        self.content_type = content_type.to_string();
        self.fingerprint = Some(fingerprint);
        self.analyzer_id = analyzer_id.to_string();
        self.analyzed_at = Utc::now();
        self.error = None;
    }
}

/// A content-understanding backend
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Identity of the backend and model; part of the cache key
    fn identity(&self) -> &str;

    /// Analyze a file of the given MIME type
    async fn analyze(&self, path: &Path, content_type: &str) -> Result<AnalysisResult>;
}

#[async_trait]
impl<A: Analyzer + ?Sized> Analyzer for Arc<A> {
    fn identity(&self) -> &str {
        (**self).identity()
    }

    async fn analyze(&self, path: &Path, content_type: &str) -> Result<AnalysisResult> {
        (**self).analyze(path, content_type).await
    }
}

/// Select the configured backend once at startup
pub fn build_analyzer(config: &AppConfig) -> Result<Arc<dyn Analyzer>> {
    let engine = &config.engine;
    let categories = config.schema.allowed_categories.clone();

    let analyzer: Arc<dyn Analyzer> = match engine.backend {
        Backend::Ollama => {
            let inner = OllamaAnalyzer::new(
                &engine.ollama_url,
                &engine.ollama_model,
                engine.timeout_secs,
                categories,
            )?;
            Arc::new(Retrying::new(inner, engine.retries))
        }
        Backend::Gemini => {
            let key = engine.api_key.clone().ok_or_else(|| {
                ArgusError::Config(
                    "Gemini backend requires an API key (set GEMINI_API_KEY)".to_string(),
                )
            })?;
            let inner = GeminiAnalyzer::new(
                &engine.gemini_url,
                &engine.gemini_model,
                &key,
                engine.timeout_secs,
                categories,
            )?;
            Arc::new(Retrying::new(inner, engine.retries))
        }
    };

    Ok(analyzer)
}

/// Guess a MIME type from the file extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "js" => "text/javascript",
        "ts" => "text/x-typescript",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" | "cc" => "text/x-c++",
        "go" => "text/x-go",
        "sh" => "application/x-sh",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "7z" => "application/x-7z-compressed",
        _ => "application/octet-stream",
    }
}

/// Whether a MIME type is worth sending as a text preview
pub fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || matches!(
            content_type,
            "application/json" | "application/xml" | "application/toml" | "application/yaml" | "application/x-sh"
        )
}

/// Build the analysis prompt shared by all backends
pub fn build_prompt(path: &Path, content_type: &str, categories: &[String]) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut prompt = format!(
        r#"Analyze this file and extract structured metadata.

File: {name}
Type: {content_type}

Respond with JSON of the form:
{{
    "title": "Brief descriptive title",
    "description": "Detailed description of content",
    "category": "One of: {categories}",
    "tags": ["relevant", "tags"],
    "subject": "Main subject or topic",
    "date": "YYYY-MM-DD if a date is mentioned or visible",
    "author": "Author or creator if identifiable",
    "suggested_filename": "descriptive_filename_without_extension"
}}

Analyze the actual content, not just the filename."#,
        categories = categories.join(", "),
    );

    if is_textual(content_type) {
        match read_preview(path) {
            Ok(preview) if !preview.trim().is_empty() => {
                prompt.push_str("\n\nContent preview:\n");
                prompt.push_str(&preview);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("No preview for {:?}: {}", path, e),
        }
    }

    prompt
}

fn read_preview(path: &Path) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(PREVIEW_BYTES);
    std::fs::File::open(path)?
        .take(PREVIEW_BYTES as u64)
        .read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Decode a model response, tolerating Markdown code fences
pub fn parse_response(raw: &str) -> Result<AnalysisResult> {
    let text = raw.trim();

    let body = if let Some((_, rest)) = text.split_once("```json") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = text.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        text
    };

    let mut result: AnalysisResult = serde_json::from_str(body.trim())
        .map_err(|e| ArgusError::Analysis(format!("Malformed model response: {}", e)))?;

    // Bookkeeping belongs to the pipeline, not the model
    result.error = None;
    result.fingerprint = None;
    result.analyzer_id.clear();
    result.content_type.clear();
    result.analyzed_at = Utc::now();
    Ok(result)
}
