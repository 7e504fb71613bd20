//! Error types for the reconciliation engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    // Wallet errors
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Wallet not found for owner {0}")]
    WalletNotFound(String),

    // Remote errors
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Endpoint unavailable ({endpoint}): {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("Upstream service error: {0}")]
    UpstreamService(String),

    #[error("Transaction {signature} rejected: {reason}")]
    TransactionRejected { signature: String, reason: String },

    // Faucet errors
    #[error("Faucet rate limit exceeded, try again in {remaining_minutes} minute(s)")]
    RateLimitExceeded { remaining_minutes: i64 },

    // Domain value errors
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    // Notification errors
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientNetwork(_) | Error::EndpointUnavailable { .. }
        )
    }

    /// Check if this error must stop the process
    ///
    /// A store that failed to persist is no longer trusted to match disk.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::TransientNetwork(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
