use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown task type: {0}")]
    UnknownJobType(String),

    #[error("no active task to cancel")]
    NoActiveJob,

    #[error("queued task not found: {0}")]
    JobNotFound(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("parse failed: {0}")]
    ParseFailed(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
