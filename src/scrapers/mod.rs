//! Article discovery and scraping.
//!
//! Fetching follows a two-phase pattern:
//!
//! 1. **Search**: Discover article URLs for a company ([`NewsSearch`])
//! 2. **Scrape**: Download and parse heading and body text from each URL ([`ArticleScraper`])
//!
//! # Implementations
//!
//! | Capability | Module | Method | Notes |
//! |------------|--------|--------|-------|
//! | Search | [`serper`] | Serper news API | Requires `SERPER_API_KEY`; past month only |
//! | Scrape | [`article`] | HTML scraping | First `<h1>` plus every `<p>` |
//!
//! A failed scrape is reported per URL as [`PipelineError::Scrape`] and
//! never fails the whole query.

use crate::error::PipelineError;
use crate::models::NewsArticle;
use async_trait::async_trait;
use std::time::Duration;

pub mod article;
pub mod serper;

/// Desktop browser User-Agent; many publishers refuse unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.3; Win64; x64) AppleWebKit/537.36 \
                                      (KHTML, like Gecko) Chrome/80.0.3987.162 Safari/537.36";

/// Find recent article URLs about a company, most relevant first.
#[async_trait(?Send)]
pub trait NewsSearch {
    async fn search(&self, company: &str) -> Result<Vec<String>, PipelineError>;
}

/// Fetch one article's heading and body text.
#[async_trait(?Send)]
pub trait ArticleScraper {
    async fn scrape(&self, url: &str) -> Result<NewsArticle, PipelineError>;
}

/// Build the outbound HTTP client shared by every collaborator.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}
