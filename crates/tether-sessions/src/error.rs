use thiserror::Error;

/// Errors that can occur while persisting the channel-session map.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Reading or writing the mapping file failed.
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The in-memory map could not be encoded.
    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The destination path is unusable (empty or a directory).
    #[error("invalid registry path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
