//! Custom error types for translation operations

use thiserror::Error;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Provider catalog or settings are unusable
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Unknown provider id
    #[error("Provider not found: {provider}")]
    NotFoundError {
        provider: String,
    },

    /// Network failure before a response was received
    #[error("Transport error: {message}")]
    TransportError {
        message: String,
    },

    /// Provider answered with a non-success status
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Provider returned content that is not a JSON object
    #[error("Response format error: {message}")]
    ResponseFormatError {
        message: String,
    },

    /// All retry attempts were used up
    #[error("Translation failed after {attempts} attempts: {last_error}")]
    TranslationFailure {
        attempts: u32,
        last_error: Box<TranslationError>,
    },

    /// Provider does not offer the bulk job API
    #[error("Batch API not supported by {provider}")]
    BatchUnsupported {
        provider: String,
    },

    /// Bulk job could not be created or ended without completing
    #[error("Batch job {job_id} ended as {status}")]
    BatchJobFailed {
        job_id: String,
        status: String,
    },

    /// Bulk job did not reach a terminal state in time
    #[error("Batch job {job_id} still running after {polls} status checks")]
    BatchJobTimeout {
        job_id: String,
        polls: u32,
    },

    /// File operation error
    #[error("File error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl TranslationError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        TranslationError::ConfigError {
            message: message.into(),
        }
    }

    /// Shorthand for a malformed provider response
    pub fn format(message: impl Into<String>) -> Self {
        TranslationError::ResponseFormatError {
            message: message.into(),
        }
    }

    /// Wrap an error together with the path it concerns
    pub fn file(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        TranslationError::FileError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Whether a fresh attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::TransportError { .. }
            | TranslationError::ResponseFormatError { .. }
            | TranslationError::HttpError(_)
            | TranslationError::JsonError(_) => true,
            TranslationError::ApiError { status, .. } => !matches!(status, 400 | 401 | 403 | 404),
            _ => false,
        }
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
