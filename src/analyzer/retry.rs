// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Retry wrapper around any analyzer

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use super::{AnalysisResult, Analyzer};
use crate::{ArgusError, Result};

/// Retries failed analyses with exponential backoff (1s, 2s, 4s, ...)
pub struct Retrying<A> {
    inner: A,
    retries: u32,
    base_delay: Duration,
}

impl<A: Analyzer> Retrying<A> {
    pub fn new(inner: A, retries: u32) -> Self {
        Self {
            inner,
            retries,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Override the first backoff step
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: Analyzer> Analyzer for Retrying<A> {
    fn identity(&self) -> &str {
        self.inner.identity()
    }

    async fn analyze(&self, path: &Path, content_type: &str) -> Result<AnalysisResult> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "Retrying analysis of {:?} in {:?} (attempt {})",
                    path,
                    delay,
                    attempt + 1
                );
                tokio::time::sleep(delay).await;
            }

            match self.inner.analyze(path, content_type).await {
                Ok(result) => return Ok(result),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ArgusError::Analysis("Unknown error".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Analyzer for Flaky {
        fn identity(&self) -> &str {
            "flaky"
        }

        async fn analyze(&self, _path: &Path, _content_type: &str) -> Result<AnalysisResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ArgusError::Analysis(format!("failure {}", n)))
            } else {
                Ok(crate::analyzer::parse_response(r#"{"title": "ok"}"#)?)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let a = Retrying::new(
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            3,
        );
        let r = a.analyze(Path::new("x"), "text/plain").await.unwrap();
        assert_eq!(r.title, "ok");
        assert_eq!(a.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(a.identity(), "flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let a = Retrying::new(
            Flaky {
                failures: 10,
                calls: AtomicU32::new(0),
            },
            1,
        )
        .with_base_delay(Duration::from_millis(10));
        let err = a.analyze(Path::new("x"), "text/plain").await.unwrap_err();
        assert!(err.to_string().contains("failure 1"));
        assert_eq!(a.inner().calls.load(Ordering::SeqCst), 2);
    }
}
