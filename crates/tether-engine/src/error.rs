/// Errors produced by the backend client and the send pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The anchor message did not show up in any history window.
    #[error("anchor message {anchor} not found in session history")]
    AnchorNotFound { anchor: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// `true` for 404 responses, used to tell "unknown session" apart from outages.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Api { status: 404, .. })
    }
}
