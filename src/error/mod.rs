use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FixityError {
    #[error("State store error: {0}")]
    Store(String),

    #[error("Object store error: {0}")]
    Objects(String),

    #[error("No object known under id {0}")]
    UnknownObject(Uuid),

    #[error("Unknown checksum algorithm: {0}")]
    Algorithm(String),

    #[error("Unknown result code: {0}")]
    ResultCode(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FixityError>;
