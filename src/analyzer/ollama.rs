// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API client for local AI inference

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{build_prompt, parse_response, AnalysisResult, Analyzer};
use crate::{ArgusError, Result};

/// Analyzer backed by a local Ollama server
pub struct OllamaAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    identity: String,
    categories: Vec<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaAnalyzer {
    /// Create a new Ollama analyzer
    pub fn new(base_url: &str, model: &str, timeout_secs: u64, categories: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_url(base_url),
            model: model.to_string(),
            identity: format!("ollama:{}", model),
            categories,
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ArgusError::Analysis(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let tags: TagsResponse = self.client.get(&url).send().await?.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        debug!("Sending request to Ollama: model={}", self.model);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ArgusError::Analysis(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response)
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn analyze(&self, path: &Path, content_type: &str) -> Result<AnalysisResult> {
        let prompt = build_prompt(path, content_type, &self.categories);
        let text = self.generate(&prompt).await?;
        parse_response(&text)
    }
}

fn normalize_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .replace("/api/generate", "")
        .replace("/api/chat", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("http://localhost:11434/"), "http://localhost:11434");
        assert_eq!(
            normalize_url("http://localhost:11434/api/generate"),
            "http://localhost:11434"
        );
    }

    #[test]
    fn test_identity_includes_model() {
        let a = OllamaAnalyzer::new("http://localhost:11434", "llama3.2-vision", 5, vec![]).unwrap();
        assert_eq!(a.identity(), "ollama:llama3.2-vision");
    }
}
