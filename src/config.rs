//! Runtime settings.
//!
//! Settings are loaded once at process start from an optional YAML file,
//! with every field defaulted, then handed to the components that need
//! them. Secrets (the Serper API key) come from the CLI or environment, and
//! the LLM endpoint, key, and model come from the `awful_aj` `config.yaml`.
//!
//! # Example
//!
//! ```yaml
//! bind: "0.0.0.0:8080"
//! template: news_pulse
//! country: in
//! speech_language: hi
//! max_articles: 10
//! article_concurrency: 4
//! call_timeout_secs: 30
//! request_timeout_secs: 180
//! ```

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Address the HTTP server listens on.
    pub bind: String,
    /// Name of the `awful_aj` chat template supplying the system prompt.
    pub template: String,
    /// Two-letter country code biasing news search results.
    pub country: String,
    /// Language the final sentiment is spoken in.
    pub speech_language: String,
    /// Upper bound on articles scraped per query.
    pub max_articles: usize,
    /// Articles scraped and extracted at once per query.
    pub article_concurrency: usize,
    /// Characters of article body sent to the model.
    pub max_article_chars: usize,
    /// Deadline for each outbound HTTP or LLM call.
    pub call_timeout_secs: u64,
    /// Deadline for an entire query, after which it is cancelled.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            template: "news_pulse".to_string(),
            country: "in".to_string(),
            speech_language: "hi".to_string(),
            max_articles: 10,
            article_concurrency: 4,
            max_article_chars: 12_000,
            call_timeout_secs: 30,
            request_timeout_secs: 180,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                let parsed = Self::from_yaml(&raw)?;
                info!(path = %path.display(), "Loaded settings file");
                parsed
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(raw).map_err(|e| PipelineError::Config(format!("invalid settings: {e}")))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_articles == 0 {
            return Err(PipelineError::Config("max_articles must be at least 1".into()));
        }
        if self.article_concurrency == 0 {
            return Err(PipelineError::Config("article_concurrency must be at least 1".into()));
        }
        if self.call_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(PipelineError::Config("timeouts must be at least 1 second".into()));
        }
        if self.speech_language.trim().is_empty() {
            return Err(PipelineError::Config("speech_language must not be empty".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
