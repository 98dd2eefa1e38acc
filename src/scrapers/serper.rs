//! Serper news search.
//!
//! Queries the [Serper](https://serper.dev) Google News API for articles
//! about a company published in the past month.
//!
//! # Response
//!
//! Only `news[].link` is read; everything else in the payload is ignored.
//! Links that are not absolute `http`/`https` URLs are dropped.

use super::NewsSearch;
use crate::api::with_timeout;
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

pub const SERPER_NEWS_URL: &str = "https://google.serper.dev/news";

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    news: Vec<SerperNewsItem>,
}

#[derive(Debug, Deserialize)]
struct SerperNewsItem {
    link: String,
}

/// [`NewsSearch`] backed by the Serper news endpoint.
#[derive(Debug, Clone)]
pub struct SerperSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    country: String,
    timeout: Duration,
}

impl SerperSearch {
    pub fn new(client: reqwest::Client, api_key: String, country: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            endpoint: SERPER_NEWS_URL.to_string(),
            country,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Request URL for `company`; `tbs=qdr:m` limits results to the past month.
    fn request_url(&self, company: &str) -> String {
        format!(
            "{}?q={}&gl={}&tbs=qdr%3Am&apiKey={}",
            self.endpoint,
            urlencoding::encode(company),
            urlencoding::encode(&self.country),
            urlencoding::encode(&self.api_key)
        )
    }

    async fn fetch(&self, company: &str) -> Result<String, PipelineError> {
        let response = self
            .client
            .get(self.request_url(company))
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest("search", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status("search", status));
        }
        response
            .text()
            .await
            .map_err(|e| PipelineError::from_reqwest("search", e))
    }
}

#[async_trait(?Send)]
impl NewsSearch for SerperSearch {
    #[instrument(level = "info", skip(self))]
    async fn search(&self, company: &str) -> Result<Vec<String>, PipelineError> {
        let body = with_timeout("search", self.timeout, self.fetch(company)).await?;
        let links = parse_links(&body)?;
        info!(count = links.len(), "Found article URLs");
        debug!(urls = ?links, "Serper URLs");
        Ok(links)
    }
}

/// Pull article links out of a Serper news response body.
pub fn parse_links(body: &str) -> Result<Vec<String>, PipelineError> {
    let parsed: SerperResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::SchemaViolation {
            what: "search response",
            reason: e.to_string(),
        })?;
    Ok(parsed
        .news
        .into_iter()
        .map(|item| item.link)
        .filter(|link| match Url::parse(link) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => true,
            _ => {
                debug!(link = %link, "Skipping non-web link");
                false
            }
        })
        .collect())
}
