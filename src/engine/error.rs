//! Errors raised while evaluating alerts.

use thiserror::Error;

/// Errors specific to alert evaluation and notification
#[derive(Error, Debug)]
pub enum AlertError {
    /// A metric source or notification channel could not be reached
    #[error("Failed to fetch metric: {0}")]
    Fetch(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// Settings row or required channel configuration is missing
    #[error("{0}")]
    Configuration(String),

    #[error("Unknown alert type: {0}")]
    UnknownKind(String),

    /// No notification channel accepted the message
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AlertError {
    /// Transient failures leave persisted state untouched and may succeed on the next run
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AlertError::Fetch(_) | AlertError::Timeout { .. } | AlertError::Delivery(_)
        )
    }
}

impl From<reqwest::Error> for AlertError {
    fn from(err: reqwest::Error) -> Self {
        AlertError::Fetch(err.to_string())
    }
}
