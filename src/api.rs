//! LLM API interaction and per-call deadlines.
//!
//! This module provides the text-generation capability the extractor and the
//! aggregator depend on. It talks to an OpenAI-compatible LLM endpoint
//! through the `awful_aj` library, using the endpoint, key, and model from
//! the `awful_aj` `config.yaml` and the system prompt from a named template.
//!
//! # Architecture
//!
//! - [`TextGenerator`]: Core trait defining async prompt-in, text-out generation
//! - [`AwfulJadeGenerator`]: Wraps the `awful_aj` library's `ask` function
//! - [`with_timeout`]: Bounds any outbound call by a deadline
//!
//! Calls are not retried: a failed or timed-out call surfaces immediately as
//! [`PipelineError::UpstreamUnavailable`].

use crate::error::PipelineError;
use async_trait::async_trait;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Trait for async text generation.
///
/// Implementors send a prompt to a model and return its raw reply. The trait
/// is `?Send` because requests run on a local task set; see `server`.
#[async_trait(?Send)]
pub trait TextGenerator {
    /// Send `prompt` to the model and return the reply text verbatim.
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

/// Run `fut` with a deadline, mapping expiry to an upstream timeout for `service`.
pub async fn with_timeout<T, F>(service: &'static str, after: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(PipelineError::timed_out(service, after)),
    }
}

/// Error text from the LLM client that no retry can fix: bad credentials,
/// an unknown model, or a request the endpoint refuses outright.
const PERMANENT_LLM_ERRORS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "incorrect api key",
    "invalid_api_key",
    "model_not_found",
    "does not exist",
    "invalid_request_error",
    "permission",
];

/// Whether an `awful_aj` error message describes a transient failure.
///
/// `awful_aj` reports every failure as a boxed error, so the message text is
/// all there is to go on. Anything not recognised as permanent is treated as
/// transient.
pub fn llm_error_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    !PERMANENT_LLM_ERRORS.iter().any(|needle| message.contains(needle))
}

/// [`TextGenerator`] backed by `awful_aj::api::ask`.
///
/// Owns the LLM configuration and chat template so a single instance can be
/// shared by every request for the life of the process.
pub struct AwfulJadeGenerator {
    /// LLM configuration (API key, endpoint, model settings).
    config: AwfulJadeConfig,
    /// Chat template supplying the system prompt.
    template: ChatTemplate,
    /// Deadline for a single model call.
    timeout: Duration,
}

impl AwfulJadeGenerator {
    pub fn new(config: AwfulJadeConfig, template: ChatTemplate, timeout: Duration) -> Self {
        Self {
            config,
            template,
            timeout,
        }
    }
}

#[async_trait(?Send)]
impl TextGenerator for AwfulJadeGenerator {
    #[instrument(level = "info", skip_all, fields(prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let t0 = Instant::now();
        let res = with_timeout("llm", self.timeout, async {
            ask(&self.config, prompt.to_string(), &self.template, None, None)
                .await
                .map_err(|e| {
                    let reason = e.to_string();
                    let retryable = llm_error_retryable(&reason);
                    PipelineError::upstream("llm", reason, retryable)
                })
        })
        .await;
        let dt = t0.elapsed();

        match &res {
            Ok(reply) => info!(
                elapsed_ms = dt.as_millis() as u64,
                reply_bytes = reply.len(),
                "LLM call succeeded"
            ),
            Err(e) => warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "LLM call failed"),
        }
        res
    }
}
