use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::table::Table;

#[derive(Debug, Error, Diagnostic)]
pub enum PipeError {
    #[error("missing configuration value: {0}")]
    Configuration(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a Google Sheets URL: {0}")]
    InvalidSheetUrl(String),

    #[error("Sheets request failed: {0}")]
    SheetsHttp(String),

    #[error("Sheets returned status {status}: {message}")]
    SheetsStatus { status: u16, message: String },

    #[error("Notion request failed: {0}")]
    NotionHttp(String),

    #[error("Notion returned status {status}: {message}")]
    NotionStatus { status: u16, message: String },

    #[error("required columns missing: {}", .0.join(", "))]
    Schema(Vec<String>),

    #[error("{} rows have CONCEPTO but lack business-key fields", invalid.len())]
    Validation { invalid: Table },

    #[error("invalid upsert rows: {0}")]
    InvalidRows(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("workbook error: {0}")]
    Workbook(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
