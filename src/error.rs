use thiserror::Error;

#[derive(Debug, Error)]
pub enum LivecapError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("A capture job is already running for {0}")]
    AlreadyRunning(String),

    #[error("No capture job running for {0}")]
    NotFound(String),

    #[error("Invalid entity identifier: {0:?}")]
    InvalidEntity(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LivecapError {
    /// True for the expected single-flight conflict, which callers treat as
    /// a no-op rather than a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LivecapError::AlreadyRunning(_))
    }
}

pub type Result<T> = std::result::Result<T, LivecapError>;
