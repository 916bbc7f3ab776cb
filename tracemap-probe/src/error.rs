use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Probe timed out after {0}s")]
    Timeout(u64),

    #[error("Probe exited with status {0}")]
    ExitStatus(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
