use thiserror::Error;

/// Errors raised by the process shell (config loading, I/O around the stores).
#[derive(Debug, Error)]
pub enum SnapSchedError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapSchedError {
    /// Short error code string used in log lines and serve-mode frames.
    pub fn code(&self) -> &'static str {
        match self {
            SnapSchedError::Config(_) => "CONFIG_ERROR",
            SnapSchedError::Serialization(_) => "SERIALIZATION_ERROR",
            SnapSchedError::Io(_) => "IO_ERROR",
            SnapSchedError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapSchedError>;
