//! Structured field extraction.
//!
//! Turns one scraped [`NewsArticle`] into an [`ArticleRecord`] by asking the
//! LLM for a JSON object and decoding it strictly. A reply that is not valid
//! JSON, misses a field, carries an unknown sentiment, or leaves the title or
//! summary blank is a [`PipelineError::SchemaViolation`].

use crate::api::TextGenerator;
use crate::error::PipelineError;
use crate::models::{ArticleRecord, NewsArticle};
use crate::utils::{looks_truncated, strip_code_fences, truncate_chars, truncate_for_log};
use serde::de::DeserializeOwned;
use std::rc::Rc;
use tracing::{debug, instrument, warn};

const FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object and nothing else. It must have exactly these fields:
{
  "Title": "Title of the article",
  "Summary": "A brief summary of the article",
  "Sentiment": "Sentiment of the article, one of \"Positive\", \"Negative\", \"Neutral\"",
  "Topics": ["Key topics from the article"]
}"#;

/// Decode a model reply into `T`, failing loudly on any schema mismatch.
///
/// A surrounding Markdown code fence is removed first; nothing else is
/// coerced.
pub fn decode_model_json<T: DeserializeOwned>(what: &'static str, reply: &str) -> Result<T, PipelineError> {
    serde_json::from_str(strip_code_fences(reply)).map_err(|e| {
        let reason = if looks_truncated(&e) {
            format!("reply was truncated: {e}")
        } else {
            e.to_string()
        };
        warn!(
            what,
            error = %reason,
            reply_preview = %truncate_for_log(reply, 300),
            "Model returned non-conforming JSON"
        );
        PipelineError::SchemaViolation { what, reason }
    })
}

/// Decode and validate one extracted record.
pub fn decode_record(reply: &str) -> Result<ArticleRecord, PipelineError> {
    let record: ArticleRecord = decode_model_json("article record", reply)?;
    if record.Title.trim().is_empty() {
        return Err(PipelineError::SchemaViolation {
            what: "article record",
            reason: "Title is blank".to_string(),
        });
    }
    if record.Summary.trim().is_empty() {
        return Err(PipelineError::SchemaViolation {
            what: "article record",
            reason: "Summary is blank".to_string(),
        });
    }
    Ok(record)
}

/// Build the extraction prompt for `article`, keeping at most `max_chars` of its body.
pub fn extraction_prompt(article: &NewsArticle, max_chars: usize) -> String {
    format!(
        "Extract the Title, Summary, Sentiment and Topics from the given article.\n\n\
         {FORMAT_INSTRUCTIONS}\n\n\
         Heading: {}\n\n{}",
        article.heading,
        truncate_chars(&article.content, max_chars)
    )
}

/// Extracts [`ArticleRecord`]s through a [`TextGenerator`].
#[derive(Clone)]
pub struct FieldExtractor {
    generator: Rc<dyn TextGenerator>,
    max_article_chars: usize,
}

impl FieldExtractor {
    pub fn new(generator: Rc<dyn TextGenerator>, max_article_chars: usize) -> Self {
        Self {
            generator,
            max_article_chars,
        }
    }

    #[instrument(level = "info", skip_all, fields(source = %article.source))]
    pub async fn extract(&self, article: &NewsArticle) -> Result<ArticleRecord, PipelineError> {
        let prompt = extraction_prompt(article, self.max_article_chars);
        let reply = self.generator.generate(&prompt).await?;
        let record = decode_record(&reply)?;
        debug!(title = %record.Title, sentiment = %record.Sentiment, topics = record.Topics.len(), "Extracted record");
        Ok(record)
    }
}
