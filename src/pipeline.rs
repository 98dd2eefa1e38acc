//! Query orchestration.
//!
//! A [`Pipeline`] turns a company name into a [`QueryResult`]:
//! 1. **Search**: Discover article URLs (deduplicated, capped)
//! 2. **Scrape + Extract**: Per article, bounded fan-out, order preserved
//! 3. **Aggregate**: Statistics and LLM prose over the surviving batch
//!
//! Per-article scrape failures and schema violations drop the article. An
//! LLM outage during extraction aborts the query, as does anything that goes
//! wrong in search or aggregation. The whole run is bounded by the request
//! deadline and stops as soon as its cancellation token fires; dropping the
//! run drops every in-flight call with it.

use crate::aggregate::Aggregator;
use crate::api::TextGenerator;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::extract::FieldExtractor;
use crate::models::{ArticleRecord, QueryResult};
use crate::scrapers::{ArticleScraper, NewsSearch};
use futures::stream::{self, StreamExt, TryStreamExt};
use itertools::Itertools;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct Pipeline {
    search: Rc<dyn NewsSearch>,
    scraper: Rc<dyn ArticleScraper>,
    extractor: FieldExtractor,
    aggregator: Aggregator,
    max_articles: usize,
    article_concurrency: usize,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        settings: &Settings,
        search: Rc<dyn NewsSearch>,
        scraper: Rc<dyn ArticleScraper>,
        generator: Rc<dyn TextGenerator>,
    ) -> Self {
        Self {
            search,
            scraper,
            extractor: FieldExtractor::new(generator.clone(), settings.max_article_chars),
            aggregator: Aggregator::new(generator),
            max_articles: settings.max_articles,
            article_concurrency: settings.article_concurrency,
            request_timeout: settings.request_timeout(),
        }
    }

    /// Run one query to completion, or until `cancel` fires or the request deadline passes.
    #[instrument(level = "info", skip(self, cancel))]
    pub async fn run(&self, company: &str, cancel: &CancellationToken) -> Result<QueryResult, PipelineError> {
        let t0 = Instant::now();
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled("request was cancelled".to_string())),
            res = tokio::time::timeout(self.request_timeout, self.execute(company)) => match res {
                Ok(res) => res,
                Err(_) => Err(PipelineError::Cancelled(format!(
                    "request exceeded {}s deadline",
                    self.request_timeout.as_secs()
                ))),
            },
        };
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        match &res {
            Ok(result) => info!(elapsed_ms, articles = result.articles.len(), "Query complete"),
            Err(e) => warn!(elapsed_ms, kind = e.kind(), error = %e, "Query failed"),
        }
        res
    }

    async fn execute(&self, company: &str) -> Result<QueryResult, PipelineError> {
        let company = company.trim();
        if company.is_empty() {
            return Err(PipelineError::InvalidRequest("company name must not be empty".to_string()));
        }

        let urls: Vec<String> = self
            .search
            .search(company)
            .await?
            .into_iter()
            .unique()
            .take(self.max_articles)
            .collect();
        if urls.is_empty() {
            return Err(PipelineError::NotFound {
                company: company.to_string(),
            });
        }

        let total = urls.len();
        info!(total, concurrency = self.article_concurrency, "Processing articles");
        let outcomes: Vec<Option<ArticleRecord>> = stream::iter(urls.iter().enumerate())
            .map(|(i, url)| self.process_article(i, url))
            .buffered(self.article_concurrency)
            .try_collect()
            .await?;
        let records: Vec<ArticleRecord> = outcomes.into_iter().flatten().collect();

        info!(
            total,
            successful = records.len(),
            failed = total - records.len(),
            "Completed article processing"
        );
        if records.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        self.aggregator.aggregate(company, records).await
    }

    /// Scrape and extract one article. `Ok(None)` means the article was dropped.
    async fn process_article(&self, index: usize, url: &str) -> Result<Option<ArticleRecord>, PipelineError> {
        let article = match self.scraper.scrape(url).await {
            Ok(article) => article,
            Err(e) => {
                warn!(index, %url, kind = e.kind(), error = %e, "Scrape failed; skipping article");
                return Ok(None);
            }
        };

        match self.extractor.extract(&article).await {
            Ok(record) => {
                debug!(index, %url, "Successfully processed article");
                Ok(Some(record))
            }
            Err(e @ PipelineError::SchemaViolation { .. }) => {
                warn!(index, %url, error = %e, "Extraction did not match schema; skipping article");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{NewsArticle, Sentiment};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// Search returning a fixed list of URLs.
    pub(crate) struct FixedSearch(pub Vec<String>);

    #[async_trait(?Send)]
    impl NewsSearch for FixedSearch {
        async fn search(&self, _company: &str) -> Result<Vec<String>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    /// Search that is down.
    struct DownSearch;

    #[async_trait(?Send)]
    impl NewsSearch for DownSearch {
        async fn search(&self, _company: &str) -> Result<Vec<String>, PipelineError> {
            Err(PipelineError::upstream("search", "HTTP 503", true))
        }
    }

    /// Scraper serving pages from memory; unknown URLs fail. Counts calls per URL.
    #[derive(Default)]
    pub(crate) struct MemoryScraper {
        pub pages: HashMap<String, String>,
        pub calls: RefCell<HashMap<String, usize>>,
    }

    #[async_trait(?Send)]
    impl ArticleScraper for MemoryScraper {
        async fn scrape(&self, url: &str) -> Result<NewsArticle, PipelineError> {
            *self.calls.borrow_mut().entry(url.to_string()).or_default() += 1;
            match self.pages.get(url) {
                Some(body) => Ok(NewsArticle {
                    source: url.to_string(),
                    heading: format!("Heading for {url}"),
                    content: body.clone(),
                }),
                None => Err(PipelineError::Scrape {
                    url: url.to_string(),
                    reason: "HTTP 404".to_string(),
                }),
            }
        }
    }

    /// LLM fake: extraction prompts are answered with the JSON record stored
    /// as the article body; report prompts get canned replies.
    pub(crate) struct EchoModel {
        pub calls: Cell<usize>,
        pub fail_extraction: bool,
    }

    impl EchoModel {
        pub fn new() -> Self {
            Self {
                calls: Cell::new(0),
                fail_extraction: false,
            }
        }
    }

    #[async_trait(?Send)]
    impl TextGenerator for EchoModel {
        async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
            self.calls.set(self.calls.get() + 1);
            if prompt.starts_with("Extract the Title") {
                if self.fail_extraction {
                    return Err(PipelineError::upstream("llm", "HTTP 429", true));
                }
                // The article body is the last paragraph of the prompt.
                let body = prompt.rsplit("\n\n").next().unwrap_or_default();
                return Ok(body.to_string());
            }
            if prompt.starts_with("Generate a coverage differences report") {
                return Ok(r#"[{"Comparison": "Articles differ.", "Impact": "Mixed signals."}]"#.to_string());
            }
            Ok("Coverage of Acme Corp is mostly positive.".to_string())
        }
    }

    /// Sets its flag when dropped.
    struct DropFlag(Rc<Cell<bool>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    /// Scraper whose fetch never completes; records whether it started and
    /// whether the pending call was dropped.
    #[derive(Default)]
    struct StallingScraper {
        started: Cell<bool>,
        dropped: Rc<Cell<bool>>,
    }

    #[async_trait(?Send)]
    impl ArticleScraper for StallingScraper {
        async fn scrape(&self, url: &str) -> Result<NewsArticle, PipelineError> {
            self.started.set(true);
            let _guard = DropFlag(Rc::clone(&self.dropped));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(PipelineError::Scrape {
                url: url.to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }

    pub(crate) fn record_json(sentiment: Sentiment, topics: &[&str]) -> String {
        serde_json::to_string(&ArticleRecord {
            Title: format!("{sentiment} news"),
            Summary: format!("Something {sentiment} happened."),
            Sentiment: sentiment,
            Topics: topics.iter().map(|t| t.to_string()).collect(),
        })
        .unwrap()
    }

    pub(crate) fn acme_scraper() -> MemoryScraper {
        let mut scraper = MemoryScraper::default();
        scraper.pages.insert("https://a.example/1".into(), record_json(Sentiment::Positive, &["x"]));
        scraper.pages.insert("https://b.example/2".into(), record_json(Sentiment::Positive, &["x", "y"]));
        scraper.pages.insert("https://c.example/3".into(), record_json(Sentiment::Negative, &["x", "z"]));
        scraper
    }

    pub(crate) fn acme_urls() -> Vec<String> {
        vec![
            "https://a.example/1".to_string(),
            "https://b.example/2".to_string(),
            "https://c.example/3".to_string(),
        ]
    }

    fn pipeline(search: Rc<dyn NewsSearch>, scraper: Rc<dyn ArticleScraper>, model: Rc<EchoModel>) -> Pipeline {
        Pipeline::new(&Settings::default(), search, scraper, model)
    }

    #[tokio::test]
    async fn test_end_to_end_acme() {
        let model = Rc::new(EchoModel::new());
        let p = pipeline(Rc::new(FixedSearch(acme_urls())), Rc::new(acme_scraper()), model.clone());

        let result = p.run("Acme Corp", &CancellationToken::new()).await.unwrap();

        let dist = result.comparative_sentiment_score.sentiment_distribution;
        assert_eq!((dist.positive, dist.negative, dist.neutral), (2, 1, 0));
        assert_eq!(
            result.topic_overlap.common_topics.iter().cloned().collect::<Vec<_>>(),
            vec!["x".to_string()]
        );
        assert!(!result.final_sentiment_analysis.is_empty());
        assert_eq!(result.articles.len(), 3);
        assert_eq!(result.articles[2].Sentiment, Sentiment::Negative);
        // Three extractions plus the coverage report and the final sentiment.
        assert_eq!(model.calls.get(), 5);
    }

    #[tokio::test]
    async fn test_zero_urls_is_not_found_without_aggregation() {
        let model = Rc::new(EchoModel::new());
        let p = pipeline(Rc::new(FixedSearch(vec![])), Rc::new(MemoryScraper::default()), model.clone());

        let err = p.run("Nobody Inc", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(model.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_failed_scrapes_are_dropped() {
        let mut urls = acme_urls();
        urls.insert(1, "https://gone.example/404".to_string());
        let p = pipeline(
            Rc::new(FixedSearch(urls)),
            Rc::new(acme_scraper()),
            Rc::new(EchoModel::new()),
        );

        let result = p.run("Acme Corp", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.articles.len(), 3);
    }

    #[tokio::test]
    async fn test_schema_violations_are_dropped() {
        let mut scraper = acme_scraper();
        scraper.pages.insert("https://d.example/4".into(), r#"{"Title": "t", "Summary": "s", "Sentiment": "Mixed", "Topics": []}"#.into());
        let mut urls = acme_urls();
        urls.push("https://d.example/4".to_string());
        let p = pipeline(Rc::new(FixedSearch(urls)), Rc::new(scraper), Rc::new(EchoModel::new()));

        let result = p.run("Acme Corp", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.comparative_sentiment_score.sentiment_distribution.total(), 3);
    }

    #[tokio::test]
    async fn test_all_articles_failing_is_empty_batch() {
        let p = pipeline(
            Rc::new(FixedSearch(vec!["https://gone.example/1".to_string()])),
            Rc::new(MemoryScraper::default()),
            Rc::new(EchoModel::new()),
        );
        let err = p.run("Acme Corp", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "empty_batch");
    }

    #[tokio::test]
    async fn test_llm_outage_during_extraction_aborts() {
        let model = Rc::new(EchoModel {
            calls: Cell::new(0),
            fail_extraction: true,
        });
        let p = pipeline(Rc::new(FixedSearch(acme_urls())), Rc::new(acme_scraper()), model);
        let err = p.run("Acme Corp", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn test_search_outage_surfaces() {
        let p = pipeline(Rc::new(DownSearch), Rc::new(acme_scraper()), Rc::new(EchoModel::new()));
        let err = p.run("Acme Corp", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_duplicate_urls_scraped_once_and_capped() {
        let scraper = Rc::new(acme_scraper());
        let mut urls = acme_urls();
        urls.insert(1, "https://a.example/1".to_string());
        let settings = Settings {
            max_articles: 2,
            ..Settings::default()
        };
        let p = Pipeline::new(&settings, Rc::new(FixedSearch(urls)), scraper.clone(), Rc::new(EchoModel::new()));

        let result = p.run("Acme Corp", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.articles.len(), 2);
        let calls = scraper.calls.borrow();
        assert_eq!(calls.get("https://a.example/1"), Some(&1));
        assert_eq!(calls.get("https://c.example/3"), None);
    }

    #[tokio::test]
    async fn test_blank_company_rejected() {
        let p = pipeline(Rc::new(FixedSearch(acme_urls())), Rc::new(acme_scraper()), Rc::new(EchoModel::new()));
        let err = p.run("   ", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_query() {
        let p = pipeline(Rc::new(FixedSearch(acme_urls())), Rc::new(acme_scraper()), Rc::new(EchoModel::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p.run("Acme Corp", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_cancels_stalled_query() {
        let scraper = Rc::new(StallingScraper::default());
        let settings = Settings {
            request_timeout_secs: 2,
            ..Settings::default()
        };
        let p = Pipeline::new(&settings, Rc::new(FixedSearch(acme_urls())), scraper.clone(), Rc::new(EchoModel::new()));

        let err = p.run("Acme Corp", &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), "cancelled");
        assert!(err.to_string().contains("deadline"));
        assert!(scraper.started.get());
        assert!(scraper.dropped.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_request_drops_pending_scrape() {
        let scraper = Rc::new(StallingScraper::default());
        let p = pipeline(Rc::new(FixedSearch(acme_urls())), scraper.clone(), Rc::new(EchoModel::new()));
        let cancel = CancellationToken::new();

        let cancel_later = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(scraper.started.get());
            assert!(!scraper.dropped.get());
            cancel.cancel();
        };
        let (res, ()) = tokio::join!(p.run("Acme Corp", &cancel), cancel_later);

        let err = res.unwrap_err();
        assert_eq!(err.kind(), "cancelled");
        assert!(!err.to_string().contains("deadline"));
        assert!(scraper.dropped.get());
    }
}
