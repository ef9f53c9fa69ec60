//! Common error types for Mirra.

use thiserror::Error;

/// Result type alias using Mirra's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Mirra operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A makeup parameter (color, region, intensity) was rejected
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Offer/answer exchange with the processing endpoint failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The underlying real-time transport reported an error
    #[error("transport error: {0}")]
    Transport(String),

    /// A request/response call to the endpoint failed
    #[error("http error: {0}")]
    Http(String),

    /// Local camera/microphone could not be acquired
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation attempted on a slot or session that was already closed
    #[error("closed: {0}")]
    Closed(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create an invalid parameter error from any displayable type.
    pub fn invalid_parameter(msg: impl std::fmt::Display) -> Self {
        Self::InvalidParameter(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create an http error from any displayable type.
    pub fn http(msg: impl std::fmt::Display) -> Self {
        Self::Http(msg.to_string())
    }

    /// Create a media acquisition error from any displayable type.
    pub fn media_acquisition(msg: impl std::fmt::Display) -> Self {
        Self::MediaAcquisition(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create a closed error from any displayable type.
    pub fn closed(msg: impl std::fmt::Display) -> Self {
        Self::Closed(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
