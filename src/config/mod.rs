// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Argus

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::{BatchSettings, TaskOptions};
use crate::{ArgusError, Result};

/// Environment variable holding the Gemini API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Longest accepted pause between files
pub const MAX_RATE_LIMIT_SECS: f64 = 3600.0;

/// Longest accepted cache TTL
pub const MAX_TTL_DAYS: u64 = 36_500;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// AI engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Worker pool settings
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Analysis cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// What to do with analysis results
    #[serde(default)]
    pub features: FeatureConfig,

    /// Allowed categories and tags offered to the model
    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Gemini,
    Ollama,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_url")]
    pub gemini_url: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    /// Prefer the environment variable over storing keys on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_delay_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeatureConfig {
    #[serde(default)]
    pub rename_files: bool,
    #[serde(default = "default_true")]
    pub embed_metadata: bool,
    #[serde(default = "default_true")]
    pub create_json_sidecar: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaConfig {
    #[serde(default = "default_categories")]
    pub allowed_categories: Vec<String>,
    #[serde(default = "default_tags")]
    pub allowed_tags: Vec<String>,
}

// Default value functions
fn default_gemini_model() -> String { "gemini-2.0-flash-exp".to_string() }
fn default_gemini_url() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_ollama_model() -> String { "llama3.2-vision".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 0 }
fn default_max_workers() -> usize { 4 }
fn default_rate_limit() -> f64 { 1.0 }
fn default_true() -> bool { true }
fn default_ttl_days() -> u64 { 30 }

fn default_cache_path() -> PathBuf {
    app_dir().join("cache.db")
}

fn default_categories() -> Vec<String> {
    ["document", "image", "video", "audio", "code", "archive", "other"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_tags() -> Vec<String> {
    ["work", "personal", "important", "archive", "project", "reference"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Per-user Argus directory (`~/.config/argus` on Linux)
pub fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("argus")
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    app_dir().join("config.json")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            gemini_model: default_gemini_model(),
            gemini_url: default_gemini_url(),
            ollama_model: default_ollama_model(),
            ollama_url: default_ollama_url(),
            api_key: None,
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            rate_limit_delay_secs: default_rate_limit(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            ttl_days: default_ttl_days(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rename_files: false,
            embed_metadata: true,
            create_json_sidecar: true,
            dry_run: false,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            allowed_categories: default_categories(),
            allowed_tags: default_tags(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON or TOML file, then apply the environment
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(path, &content)?
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        if is_toml(path) {
            toml::from_str(content)
                .map_err(|e| ArgusError::Config(format!("Failed to parse config: {}", e)))
        } else {
            serde_json::from_str(content)
                .map_err(|e| ArgusError::Config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Save configuration, TOML if the extension says so and JSON otherwise
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| ArgusError::Toml(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self)?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay environment variables
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.engine.api_key = Some(key);
            }
        }
    }

    /// Reject settings the batch pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.max_workers == 0 {
            return Err(ArgusError::Config("max_workers must be at least 1".to_string()));
        }
        let delay = self.processing.rate_limit_delay_secs;
        if !delay.is_finite() || delay < 0.0 || delay > MAX_RATE_LIMIT_SECS {
            return Err(ArgusError::Config(format!(
                "rate_limit_delay_secs must be between 0 and {}, got {}",
                MAX_RATE_LIMIT_SECS, delay
            )));
        }
        if self.cache.ttl_days > MAX_TTL_DAYS {
            return Err(ArgusError::Config(format!(
                "ttl_days must be at most {}, got {}",
                MAX_TTL_DAYS, self.cache.ttl_days
            )));
        }
        if self.schema.allowed_categories.is_empty() {
            return Err(ArgusError::Config("allowed_categories must not be empty".to_string()));
        }
        Ok(())
    }

    /// Model name of the selected backend
    pub fn active_model(&self) -> &str {
        match self.engine.backend {
            Backend::Gemini => &self.engine.gemini_model,
            Backend::Ollama => &self.engine.ollama_model,
        }
    }

    /// Override the model of the selected backend
    pub fn set_active_model(&mut self, model: &str) {
        match self.engine.backend {
            Backend::Gemini => self.engine.gemini_model = model.to_string(),
            Backend::Ollama => self.engine.ollama_model = model.to_string(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_days.saturating_mul(86_400))
    }

    pub fn batch_settings(&self) -> Result<BatchSettings> {
        let delay = self.processing.rate_limit_delay_secs;
        let rate_limit_delay = Duration::try_from_secs_f64(delay)
            .map_err(|e| ArgusError::Config(format!("Invalid rate_limit_delay_secs {}: {}", delay, e)))?;

        Ok(BatchSettings {
            max_workers: self.processing.max_workers,
            rate_limit_delay,
        })
    }

    pub fn task_options(&self) -> TaskOptions {
        TaskOptions {
            rename: self.features.rename_files,
            dry_run: self.features.dry_run,
            embed_metadata: self.features.embed_metadata,
            write_sidecar: self.features.create_json_sidecar,
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}
