//! Generic news article scraper.
//!
//! Publishers vary too much for per-site selectors, so this takes the
//! lowest common denominator: the first `<h1>` is the heading and every
//! `<p>` on the page, trimmed and newline-joined, is the body.

use super::ArticleScraper;
use crate::api::with_timeout;
use crate::error::PipelineError;
use crate::models::NewsArticle;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{info, instrument};

static HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());

/// [`ArticleScraper`] that downloads a page over HTTP and parses it.
#[derive(Debug, Clone)]
pub struct HtmlArticleScraper {
    client: reqwest::Client,
    timeout: Duration,
}

impl HtmlArticleScraper {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, url: &str) -> Result<String, PipelineError> {
        let scrape_err = |reason: String| PipelineError::Scrape {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| scrape_err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(scrape_err(format!("HTTP {status}")));
        }
        response.text().await.map_err(|e| scrape_err(e.to_string()))
    }
}

#[async_trait(?Send)]
impl ArticleScraper for HtmlArticleScraper {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn scrape(&self, url: &str) -> Result<NewsArticle, PipelineError> {
        let body = match with_timeout("scrape", self.timeout, self.fetch(url)).await {
            Ok(body) => body,
            // Timeouts are a per-article failure here, not an outage.
            Err(PipelineError::UpstreamUnavailable { reason, .. }) => {
                return Err(PipelineError::Scrape {
                    url: url.to_string(),
                    reason,
                });
            }
            Err(e) => return Err(e),
        };
        let article = parse_article(url, &body)?;
        info!(
            heading_bytes = article.heading.len(),
            content_bytes = article.content.len(),
            "Parsed article"
        );
        Ok(article)
    }
}

/// Extract heading and body text from an article page.
pub fn parse_article(url: &str, html: &str) -> Result<NewsArticle, PipelineError> {
    let document = Html::parse_document(html);

    let heading = document
        .select(&HEADING)
        .next()
        .map(|h| h.text().collect::<String>().trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PipelineError::Scrape {
            url: url.to_string(),
            reason: "page has no <h1> heading".to_string(),
        })?;

    let content = document
        .select(&PARAGRAPH)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if content.is_empty() {
        return Err(PipelineError::Scrape {
            url: url.to_string(),
            reason: "page has no paragraph text".to_string(),
        });
    }

    Ok(NewsArticle {
        source: url.to_string(),
        heading,
        content,
    })
}
