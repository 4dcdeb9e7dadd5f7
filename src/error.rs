//! Crate-wide error taxonomy.
//!
//! Every kind named in spec §7 is a variant here so the worker runtime can
//! match on it when deciding whether a job fails, degrades a score, or
//! continues. Unexpected failures at the store boundary collapse into
//! `Internal` rather than growing the enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation_error: {0}")]
    ValidationError(String),

    #[error("data_unavailable: {0}")]
    DataUnavailable(String),

    #[error("insufficient_data: {0}")]
    InsufficientData(String),

    #[error("insufficient_history: {0}")]
    InsufficientHistory(String),

    #[error("malformed_signal: {0}")]
    MalformedSignal(String),

    #[error("empty_frame")]
    EmptyFrame,

    #[error("worker_crashed")]
    WorkerCrashed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl AppError {
    /// The bounded, single-line string that is safe to surface on a Job's
    /// `error_message` field. Internal stack detail is logged, not surfaced
    /// (spec §7).
    pub fn user_message(&self) -> String {
        match self {
            AppError::ValidationError(m) => format!("VALIDATION_ERROR: {m}"),
            AppError::DataUnavailable(m) => format!("DATA_UNAVAILABLE: {m}"),
            AppError::InsufficientData(m) => format!("INSUFFICIENT_DATA: {m}"),
            AppError::InsufficientHistory(m) => format!("INSUFFICIENT_HISTORY: {m}"),
            AppError::MalformedSignal(m) => format!("MALFORMED_SIGNAL: {m}"),
            AppError::EmptyFrame => "EMPTY_FRAME".to_string(),
            AppError::WorkerCrashed => "worker_crashed".to_string(),
            AppError::Internal(_) => "internal_error".to_string(),
            AppError::Sqlite(_) => "store_error".to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
