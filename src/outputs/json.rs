//! JSON output for one-shot queries.
//!
//! Results are organized by date with the company slug as the file name:
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     ├── tesla.json
//!     └── acme-corp.json
//! ```
//!
//! Running the same company twice on one day overwrites that day's file.

use crate::models::QueryResult;
use crate::utils::slugify_title;
use chrono::Local;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Path a result for `company` on `date` (`YYYY-MM-DD`) is written to.
pub fn result_path(json_output_dir: &str, date: &str, company: &str) -> PathBuf {
    let slug = match slugify_title(company.trim()) {
        s if s.is_empty() => "company".to_string(),
        s => s,
    };
    PathBuf::from(json_output_dir)
        .join(date)
        .join(format!("{slug}.json"))
}

/// Write a [`QueryResult`] as pretty JSON under today's date directory.
///
/// # Returns
///
/// The path written, or an error if directory creation or file writing fails.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_query_result(
    result: &QueryResult,
    json_output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(result)?;
    let local_date = Local::now().date_naive().to_string();
    let path = result_path(json_output_dir, &local_date, &result.company_name);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote JSON result file");
    Ok(path)
}
