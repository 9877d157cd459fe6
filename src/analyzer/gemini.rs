// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Google Gemini REST client for remote analysis

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{build_prompt, parse_response, AnalysisResult, Analyzer};
use crate::{ArgusError, Result};

/// Analyzer backed by the Gemini `generateContent` endpoint
pub struct GeminiAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    identity: String,
    categories: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiAnalyzer {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout_secs: u64,
        categories: Vec<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            identity: format!("gemini:{}", model),
            categories,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        debug!("Sending request to Gemini: model={}", self.model);

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ArgusError::Analysis(format!(
                "Gemini returned status {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response.json().await?;
        extract_text(body)
    }
}

fn extract_text(body: GenerateResponse) -> Result<String> {
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ArgusError::Analysis("Gemini returned no candidates".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn analyze(&self, path: &Path, content_type: &str) -> Result<AnalysisResult> {
        let prompt = build_prompt(path, content_type, &self.categories);
        let text = self.generate(&prompt).await?;
        parse_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"title\":"}, {"text": "\"x\"}"}]}}]
        }))
        .unwrap();
        assert_eq!(extract_text(body).unwrap(), "{\"title\":\"x\"}");
    }

    #[test]
    fn test_extract_text_without_candidates() {
        let body: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(extract_text(body).is_err());
    }

    #[test]
    fn test_endpoint() {
        let a = GeminiAnalyzer::new(
            "https://generativelanguage.googleapis.com/",
            "gemini-2.0-flash-exp",
            "k",
            5,
            vec![],
        )
        .unwrap();
        assert_eq!(
            a.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-exp:generateContent"
        );
        assert_eq!(a.identity(), "gemini:gemini-2.0-flash-exp");
    }
}
