use thiserror::Error;

/// Errors from a single round trip to the analysis engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("HTTP {status}: {message}")]
    ServerRejected { status: u16, message: String },

    #[error("rate limited")]
    RateLimited,
}

/// Errors published to the scan view
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Connection problem: {0}")]
    Transport(String),

    #[error("Scan rejected (HTTP {status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("Scan timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Analysis failed: {0}")]
    Failed(String),

    #[error("Scan aborted")]
    Aborted,
}

impl ScanError {
    /// Whether the view should offer a retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScanError::InvalidInput(_) | ScanError::Aborted)
    }
}

impl From<ClientError> for ScanError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidInput(msg) => ScanError::InvalidInput(msg),
            ClientError::TooLarge { .. } => ScanError::InvalidInput(err.to_string()),
            ClientError::Network(msg) => ScanError::Transport(msg),
            ClientError::Malformed(msg) => ScanError::Transport(format!("malformed response: {msg}")),
            ClientError::ServerRejected { status, message } => {
                ScanError::ServerRejected { status, message }
            }
            ClientError::RateLimited => ScanError::ServerRejected {
                status: 429,
                message: "Rate limited, try again in a minute".to_string(),
            },
        }
    }
}

/// Errors from history sinks. Absorbed by the store and logged.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("durable history HTTP error: {0}")]
    Http(String),
}
