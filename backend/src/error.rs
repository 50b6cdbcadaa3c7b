//! Error handling for the rainfall watering advisor
//!
//! Storage, builder and rule errors propagate to the daily run. Notification
//! failures are downgraded to warnings by the caller.

use chrono::NaiveDate;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Storage errors
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Malformed record ({field}): {message}")]
    MalformedRecord { field: String, message: String },

    // Decision errors
    #[error("Insufficient data for {decision_date}: missing historical offsets {missing_offsets:?}")]
    InsufficientData {
        decision_date: NaiveDate,
        missing_offsets: Vec<i64>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // External service errors
    #[error("Notification failed: {0}")]
    NotificationFailure(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::MalformedRecord {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable code for log lines and exit reporting
    pub fn code(&self) -> &'static str {
        match self {
            AppError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AppError::MalformedRecord { .. } => "MALFORMED_RECORD",
            AppError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::NotificationFailure(_) => "NOTIFICATION_FAILURE",
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for library operations
pub type AppResult<T> = Result<T, AppError>;
