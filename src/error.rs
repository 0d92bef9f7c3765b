//! Custom error types for rustreview.
//!
//! This module defines all error types used throughout the library.
//! All functions return `Result<T, ReviewError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rustreview operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Completion service answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from API
        message: String,
    },

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Spreadsheet read/write error
    #[error("Sheet error: {0}")]
    Sheet(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `ReviewError`
pub type Result<T> = std::result::Result<T, ReviewError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ReviewError::Parse(msg.to_string()))
    }
}

impl From<csv::Error> for ReviewError {
    fn from(e: csv::Error) -> Self {
        ReviewError::Sheet(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReviewError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        ReviewError::Sheet(e.to_string())
    }
}
