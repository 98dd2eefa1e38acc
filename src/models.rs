//! Data models for scraped articles, extracted records, and the query result.
//!
//! This module defines the core data structures used throughout the application:
//! - [`NewsArticle`]: Raw scraped article data (heading + body text)
//! - [`ArticleRecord`]: LLM-extracted fields for one article
//! - [`SentimentDistribution`], [`CoverageDifference`]: aggregate statistics
//! - [`QueryResult`]: The JSON document returned for one company query
//!
//! The record models use PascalCase field names to match the JSON schema the
//! LLM is asked to produce, hence the `#[allow(non_snake_case)]` attributes.
//! [`QueryResult`] keeps the spaced key names of the public JSON document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A raw news article as scraped from its publisher.
///
/// This struct represents the unprocessed article content before it is
/// sent to the LLM for field extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsArticle {
    /// The URL the article was scraped from.
    pub source: String,
    /// Text of the first `<h1>` on the page.
    pub heading: String,
    /// Every paragraph of body text, one per line.
    pub content: String,
}

/// Overall tone of one article.
///
/// Decoding is exact and case-sensitive: anything other than the three
/// literals is rejected, so an off-schema value can never be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields the LLM extracts from a single article.
///
/// Records are produced once per article and never modified afterwards.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArticleRecord {
    /// Title of the article.
    pub Title: String,
    /// A brief summary of the article.
    pub Summary: String,
    /// Sentiment of the article toward the company.
    pub Sentiment: Sentiment,
    /// Key topics, in the order the model listed them.
    pub Topics: Vec<String>,
}

impl ArticleRecord {
    /// The record's topics as a set, for overlap computation.
    pub fn topic_set(&self) -> BTreeSet<&str> {
        self.Topics.iter().map(String::as_str).collect()
    }
}

/// Count of articles per [`Sentiment`]. All three keys are always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SentimentDistribution {
    #[serde(rename = "Positive")]
    pub positive: usize,
    #[serde(rename = "Negative")]
    pub negative: usize,
    #[serde(rename = "Neutral")]
    pub neutral: usize,
}

impl SentimentDistribution {
    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral
    }
}

/// One notable difference in how the batch's articles cover the company.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoverageDifference {
    /// What differs between the articles.
    pub Comparison: String,
    /// The likely effect of that difference on readers.
    pub Impact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ComparativeSentimentScore {
    #[serde(rename = "Sentiment Distribution")]
    pub sentiment_distribution: SentimentDistribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicOverlap {
    /// Topics present in every article, sorted.
    #[serde(rename = "Common Topics")]
    pub common_topics: BTreeSet<String>,
}

/// The aggregate answer to one company query.
///
/// Built fresh per request and discarded once the response is sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryResult {
    #[serde(rename = "Company Name")]
    pub company_name: String,
    #[serde(rename = "Articles")]
    pub articles: Vec<ArticleRecord>,
    #[serde(rename = "Comparative Sentiment Score")]
    pub comparative_sentiment_score: ComparativeSentimentScore,
    #[serde(rename = "Topic Overlap")]
    pub topic_overlap: TopicOverlap,
    #[serde(rename = "Coverage Differences")]
    pub coverage_differences: Vec<CoverageDifference>,
    #[serde(rename = "Final Sentiment Analysis")]
    pub final_sentiment_analysis: String,
}
