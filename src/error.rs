use thiserror::Error;

#[derive(Error, Debug)]
pub enum TmemError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sampler error: {0}")]
    Sampler(String),

    #[error("Memory bind error: {0}")]
    Bind(String),

    #[error("Mapping error: {0}")]
    Map(String),

    #[error("Affinity error: {0}")]
    Affinity(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Resource exhausted: {0}")]
    Exhausted(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, TmemError>;

impl TmemError {
    /// Errors that abort initialization; everything else is handled locally
    /// and surfaced as counters and log lines.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TmemError::Config(_) | TmemError::Sampler(_))
    }
}
