//! Output writers for query results.
//!
//! - [`json`]: Pretty-printed [`QueryResult`](crate::models::QueryResult) files organized by date

pub mod json;
