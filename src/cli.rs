//! Command-line interface definitions for News Pulse.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Secrets and file locations can be provided via flags or environment
//! variables; `.env` is loaded before parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the News Pulse application.
///
/// # Examples
///
/// ```sh
/// # Serve the query API and web form
/// news_pulse serve --bind 0.0.0.0:8080
///
/// # One-shot query, writing JSON and the spoken synopsis
/// news_pulse query "Tesla" -j ./json --audio-out tesla.mp3
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a settings YAML file
    #[arg(short, long, env = "NEWS_PULSE_SETTINGS", global = true)]
    pub settings: Option<PathBuf>,

    /// Optional path to the awful_aj config.yaml (defaults to the awful_aj config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Serper API key used for news search
    #[arg(long, env = "SERPER_API_KEY", hide_env_values = true, global = true)]
    pub serper_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve {
        /// Listen address, overriding the settings file
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Run a single query and print the result as JSON
    Query {
        /// Company to search news for
        company: String,

        /// Output directory for the JSON result file
        #[arg(short, long)]
        json_output_dir: Option<String>,

        /// Write the spoken final sentiment to this MP3 file
        #[arg(short, long)]
        audio_out: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_serve() {
        let cli = Cli::parse_from(["news_pulse", "serve", "--bind", "127.0.0.1:9000"]);
        match cli.command {
            Command::Serve { bind } => assert_eq!(bind.as_deref(), Some("127.0.0.1:9000")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_query_short_flags() {
        let cli = Cli::parse_from([
            "news_pulse",
            "query",
            "Acme Corp",
            "-j",
            "/tmp/json",
            "-a",
            "/tmp/acme.mp3",
            "--settings",
            "/etc/news_pulse.yaml",
        ]);

        assert_eq!(cli.settings, Some(PathBuf::from("/etc/news_pulse.yaml")));
        match cli.command {
            Command::Query {
                company,
                json_output_dir,
                audio_out,
            } => {
                assert_eq!(company, "Acme Corp");
                assert_eq!(json_output_dir.as_deref(), Some("/tmp/json"));
                assert_eq!(audio_out, Some(PathBuf::from("/tmp/acme.mp3")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["news_pulse"]).is_err());
    }
}
