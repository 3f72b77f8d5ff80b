// src/error.rs

//! Unified error handling for the crawler application.

use std::fmt;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::pipeline::merge::MergeError;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Browser automation failed
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Columnar merge failed
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invocation payload could not be interpreted
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Secret lookup failed
    #[error("Secret '{id}' unavailable: {message}")]
    Secret { id: String, message: String },

    /// Downstream publish call returned a non-success status
    #[error("Publish failed with status {status}: {message}")]
    Publish { status: u16, message: String },

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a secret lookup error.
    pub fn secret(id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Secret {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// HTTP-style status code used when this error is answered to an invoker.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Merge(e) if e.is_missing_input() => 404,
            Self::Publish { .. } | Self::Secret { .. } => 502,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::invalid_input("x").status_code(), 400);
        assert_eq!(AppError::config("bucket").status_code(), 500);
        assert_eq!(
            AppError::Publish {
                status: 422,
                message: "sha mismatch".into()
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn test_display() {
        let err = AppError::crawl("page 3", "listing never loaded");
        assert_eq!(
            err.to_string(),
            "Crawl error for page 3: listing never loaded"
        );
    }
}
