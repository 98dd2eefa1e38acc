//! # News Pulse
//!
//! A company news sentiment service. For a company name it finds recent news
//! article URLs, scrapes each article, asks an LLM to extract a title,
//! summary, sentiment, and topics, and then aggregates the batch into a
//! sentiment distribution, the topics every article shares, a coverage
//! differences report, and a one-paragraph final sentiment. The final
//! sentiment can be translated and spoken as an MP3 clip.
//!
//! ## Usage
//!
//! ```sh
//! # HTTP API and web form
//! SERPER_API_KEY=... news_pulse serve --bind 0.0.0.0:8080
//!
//! # One-shot query
//! SERPER_API_KEY=... news_pulse query "Tesla" -j ./json -a tesla.mp3
//! ```
//!
//! ## Architecture
//!
//! 1. **Search**: Collect up to `max_articles` distinct article URLs
//! 2. **Scraping**: Fetch each page and keep its heading and paragraphs
//! 3. **Extraction**: One LLM call per article (`article_concurrency` at a time)
//! 4. **Aggregation**: Local statistics plus two LLM calls over the batch
//! 5. **Output**: JSON over HTTP or to disk, and translated speech

use awful_aj::{config_dir, template};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod aggregate;
mod api;
mod cli;
mod config;
mod error;
mod extract;
mod models;
mod outputs;
mod pipeline;
mod scrapers;
mod server;
mod speech;
mod utils;

use api::AwfulJadeGenerator;
use cli::{Cli, Command};
use config::Settings;
use error::{ErrorBody, PipelineError};
use outputs::json;
use pipeline::Pipeline;
use scrapers::{article::HtmlArticleScraper, serper::SerperSearch};
use server::AppState;
use speech::{GoogleTts, MyMemoryTranslator, Speaker};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_pulse starting up");

    // .env must be loaded before clap reads env-backed flags
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "Loaded .env");
    }
    let args = Cli::parse();
    debug!(?args.settings, ?args.config, "Parsed CLI arguments");

    let settings = Settings::load(args.settings.as_deref())?;
    info!(
        max_articles = settings.max_articles,
        article_concurrency = settings.article_concurrency,
        call_timeout_secs = settings.call_timeout_secs,
        request_timeout_secs = settings.request_timeout_secs,
        "Settings ready"
    );

    let (pipeline, speaker) = build_components(&args, &settings).await?;

    match args.command {
        Command::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| settings.bind.clone());
            run_server(&addr, AppState { pipeline, speaker }).await?;
        }
        Command::Query {
            company,
            json_output_dir,
            audio_out,
        } => {
            run_query(&pipeline, &speaker, &company, json_output_dir.as_deref(), audio_out).await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Load the LLM config and template and wire up the search, scraping,
/// extraction, and speech collaborators.
async fn build_components(args: &Cli, settings: &Settings) -> Result<(Pipeline, Speaker), Box<dyn Error>> {
    let api_key = args
        .serper_api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| PipelineError::Config("SERPER_API_KEY is not set".to_string()))?;

    // ---- Load template & config ----
    let conf_file: PathBuf = match &args.config {
        Some(path) => path.clone(),
        None => config_dir()?.join("config.yaml"),
    };
    let config_path = conf_file
        .to_str()
        .ok_or_else(|| PipelineError::Config(format!("not a valid config filename: {}", conf_file.display())))?;
    let llm_config = awful_aj::config::load_config(config_path)
        .map_err(|e| PipelineError::Config(format!("cannot load {config_path}: {e}")))?;
    info!(config_path, "Loaded configuration");

    let chat_template = template::load_template(&settings.template)
        .await
        .map_err(|e| PipelineError::Config(format!("cannot load template {}: {e}", settings.template)))?;
    info!(template = %settings.template, "Loaded template");

    let client = scrapers::http_client(settings.call_timeout())?;
    let generator = Rc::new(AwfulJadeGenerator::new(
        llm_config,
        chat_template,
        settings.call_timeout(),
    ));
    let search = Rc::new(SerperSearch::new(
        client.clone(),
        api_key,
        settings.country.clone(),
        settings.call_timeout(),
    ));
    let scraper = Rc::new(HtmlArticleScraper::new(client.clone(), settings.call_timeout()));

    let pipeline = Pipeline::new(settings, search, scraper, generator);
    let speaker = Speaker::new(
        Rc::new(MyMemoryTranslator::new(client.clone(), settings.call_timeout())),
        Rc::new(GoogleTts::new(client, settings.call_timeout())),
        settings.speech_language.clone(),
    );
    Ok((pipeline, speaker))
}

/// Serve until Ctrl-C, then cancel in-flight queries and drain their tasks.
#[instrument(level = "info", skip(state))]
async fn run_server(addr: &str, state: AppState) -> Result<(), Box<dyn Error>> {
    let http = server::bind(addr)?;
    let shutdown = CancellationToken::new();

    let local = tokio::task::LocalSet::new();
    let watcher = shutdown.clone();
    local.spawn_local(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received; shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C; shutting down"),
        }
        watcher.cancel();
    });

    local
        .run_until(server::serve(http, Rc::new(state), shutdown))
        .await?;
    local.await;
    Ok(())
}

/// Run one query, print it, and optionally persist the JSON and the spoken
/// final sentiment.
#[instrument(level = "info", skip(pipeline, speaker))]
async fn run_query(
    pipeline: &Pipeline,
    speaker: &Speaker,
    company: &str,
    json_output_dir: Option<&str>,
    audio_out: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    // Early check: ensure JSON output dir is writable
    if let Some(dir) = json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir,
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; cancelling query");
            on_interrupt.cancel();
        }
    });

    let result = match pipeline.run(company, &cancel).await {
        Ok(result) => result,
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&ErrorBody::from(&e))?);
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(dir) = json_output_dir {
        if let Err(e) = json::write_query_result(&result, dir).await {
            error!(error = %e, "Failed to write JSON result");
        }
    }

    if let Some(path) = audio_out {
        let audio = speaker.speak(&result.final_sentiment_analysis, None).await?;
        tokio::fs::write(&path, &audio).await?;
        info!(path = %path.display(), bytes = audio.len(), "Wrote spoken final sentiment");
    }
    Ok(())
}
