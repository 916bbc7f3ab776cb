use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Malformed graph document: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
