//! Error types for Notebridge

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) => 2,
            BridgeError::State(_) => 1,
            BridgeError::Transport(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to write state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure talking to either network.
///
/// Every variant is recoverable; the call site decides whether that means
/// backing off, skipping an attachment, or failing a single note.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Classify an HTTP status code returned by either API
    pub fn from_status(status: u16, context: &str, detail: &str) -> Self {
        match status {
            401 | 403 => TransportError::Authentication(format!(
                "{} returned HTTP {}: {}. Check that the access token is valid.",
                context, status, detail
            )),
            429 => TransportError::RateLimit(format!(
                "{} returned HTTP 429: {}",
                context, detail
            )),
            400..=499 => TransportError::Rejected(format!(
                "{} returned HTTP {}: {}",
                context, status, detail
            )),
            _ => TransportError::Network(format!(
                "{} returned HTTP {}: {}",
                context, status, detail
            )),
        }
    }
}
