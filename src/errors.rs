use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Operator response could not be verified")]
    VerificationFailed,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cookie store error: {0}")]
    Cookie(String),

    #[error("Pending event was superseded before a handler was registered")]
    EventSuperseded,

    #[error("Command queue is stopped")]
    QueueStopped,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Returns true for transport-level failures the caller may retry.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::HttpStatus { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return SyncError::Network(format!("request timed out: {}", e));
        }
        SyncError::Network(e.to_string())
    }
}
