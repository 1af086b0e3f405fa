use thiserror::Error;

#[derive(Debug, Error)]
pub enum TetherError {
    /// The config file or an env override could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TetherError {
    /// Short stable code for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            TetherError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
