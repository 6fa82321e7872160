//! Error taxonomy shared by every Ratewatch crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RatewatchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Execution unit error: {0}")]
    Unit(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RatewatchError>;
