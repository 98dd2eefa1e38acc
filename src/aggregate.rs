//! Batch aggregation over extracted article records.
//!
//! Two statistics are computed locally ([`sentiment_distribution`],
//! [`topic_overlap`]) and two pieces of prose are delegated to the LLM
//! ([`coverage_report`], [`final_sentiment`]). None of them mutate the batch,
//! and [`Aggregator::aggregate`] runs them concurrently before assembling the
//! [`QueryResult`].

use crate::api::TextGenerator;
use crate::error::PipelineError;
use crate::extract::decode_model_json;
use crate::models::{
    ArticleRecord, ComparativeSentimentScore, CoverageDifference, QueryResult, Sentiment,
    SentimentDistribution, TopicOverlap,
};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::rc::Rc;
use tracing::{info, instrument};

const COVERAGE_INSTRUCTIONS: &str = r#"Generate a coverage differences report comparing the key themes, focus areas, and implications of the news articles below.

Instructions:
1. Analyze the articles and identify their key themes, focus areas, and tones.
2. Compare how each article approaches the topic differently.
3. Assess the potential impact of these differences on investors, stakeholders, or the general public.
4. Report any number of differences.

Respond with a JSON array and nothing else. Every element must be an object with exactly two string fields:
[
  {
    "Comparison": "Article 1 highlights Tesla's strong sales, while Article 2 discusses regulatory issues.",
    "Impact": "The first article boosts confidence in Tesla's market growth, while the second raises concerns about future regulatory hurdles."
  }
]"#;

const FINAL_SENTIMENT_INSTRUCTIONS: &str = "Generate a final sentiment analysis of the given articles in 2-3 sentences.\n\n\
     Example output: Tesla's latest news coverage is mostly positive. Potential stock growth expected.\n\n\
     Respond with the analysis only. Do not include text like 'Here is a final sentiment analysis:'.";

/// Count records per sentiment. All three buckets are present even when zero.
///
/// Sentiment values are validated when records are decoded, so every record
/// lands in exactly one bucket and the counts sum to the batch size.
pub fn sentiment_distribution(records: &[ArticleRecord]) -> SentimentDistribution {
    let mut dist = SentimentDistribution::default();
    for record in records {
        match record.Sentiment {
            Sentiment::Positive => dist.positive += 1,
            Sentiment::Negative => dist.negative += 1,
            Sentiment::Neutral => dist.neutral += 1,
        }
    }
    dist
}

/// Topics shared by every record, compared case-sensitively.
///
/// # Errors
///
/// [`PipelineError::EmptyBatch`] when `records` is empty.
pub fn topic_overlap(records: &[ArticleRecord]) -> Result<BTreeSet<String>, PipelineError> {
    let (first, rest) = records.split_first().ok_or(PipelineError::EmptyBatch)?;
    let mut common = first.topic_set();
    for record in rest {
        let topics = record.topic_set();
        common.retain(|t| topics.contains(t));
    }
    Ok(common.into_iter().map(str::to_string).collect())
}

/// Prompt embedding every record's fields for the coverage report.
pub fn coverage_prompt(records: &[ArticleRecord]) -> String {
    let mut prompt = String::from(COVERAGE_INSTRUCTIONS);
    prompt.push_str("\n\nArticles:\n");
    for (idx, record) in records.iter().enumerate() {
        let _ = write!(
            prompt,
            "\nArticle {}\nTitle: {}\nSummary: {}\nSentiment: {}\nTopics: {}\n",
            idx + 1,
            record.Title,
            record.Summary,
            record.Sentiment,
            record.Topics.join(", ")
        );
    }
    prompt
}

/// Prompt of numbered summaries for the final sentiment synopsis.
pub fn final_sentiment_prompt(records: &[ArticleRecord]) -> String {
    let mut body = String::new();
    for (idx, record) in records.iter().enumerate() {
        let _ = write!(body, "{}. {}\n\n", idx, record.Summary);
    }
    format!("{FINAL_SENTIMENT_INSTRUCTIONS}\n\n{body}")
}

/// Ask the model how the batch's coverage differs, validating the reply.
///
/// # Errors
///
/// [`PipelineError::SchemaViolation`] unless the reply is a JSON array of
/// objects each carrying string `Comparison` and `Impact` fields.
#[instrument(level = "info", skip_all, fields(articles = records.len()))]
pub async fn coverage_report(
    generator: &dyn TextGenerator,
    records: &[ArticleRecord],
) -> Result<Vec<CoverageDifference>, PipelineError> {
    let reply = generator.generate(&coverage_prompt(records)).await?;
    let report: Vec<CoverageDifference> = decode_model_json("coverage report", &reply)?;
    info!(differences = report.len(), "Built coverage report");
    Ok(report)
}

/// Ask the model for a short overall sentiment synopsis, returned verbatim.
#[instrument(level = "info", skip_all, fields(articles = records.len()))]
pub async fn final_sentiment(
    generator: &dyn TextGenerator,
    records: &[ArticleRecord],
) -> Result<String, PipelineError> {
    let reply = generator.generate(&final_sentiment_prompt(records)).await?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(PipelineError::upstream("llm", "empty final sentiment reply", true));
    }
    Ok(reply.to_string())
}

/// Runs the four aggregate computations and assembles the [`QueryResult`].
#[derive(Clone)]
pub struct Aggregator {
    generator: Rc<dyn TextGenerator>,
}

impl Aggregator {
    pub fn new(generator: Rc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    #[instrument(level = "info", skip(self, records), fields(articles = records.len()))]
    pub async fn aggregate(
        &self,
        company: &str,
        records: Vec<ArticleRecord>,
    ) -> Result<QueryResult, PipelineError> {
        let common_topics = topic_overlap(&records)?;
        let distribution = sentiment_distribution(&records);

        let (coverage_differences, final_sentiment_analysis) = futures::try_join!(
            coverage_report(self.generator.as_ref(), &records),
            final_sentiment(self.generator.as_ref(), &records),
        )?;

        debug_assert_eq!(distribution.total(), records.len());
        info!(
            positive = distribution.positive,
            negative = distribution.negative,
            neutral = distribution.neutral,
            common_topics = common_topics.len(),
            "Aggregated batch"
        );

        Ok(QueryResult {
            company_name: company.to_string(),
            articles: records,
            comparative_sentiment_score: ComparativeSentimentScore {
                sentiment_distribution: distribution,
            },
            topic_overlap: TopicOverlap { common_topics },
            coverage_differences,
            final_sentiment_analysis,
        })
    }
}
