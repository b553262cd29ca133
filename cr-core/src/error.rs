//! Global error types for the Chaos Route tracking client.
//!
//! All error categories are unified into a single `CrError` enum with
//! conversions from the underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using CrError.
pub type CrResult<T> = Result<T, CrError>;

/// Unified error type covering all error categories in Chaos Route.
#[derive(Error, Debug)]
pub enum CrError {
    // -- Configuration errors --
    /// Failed to load, parse, or validate application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// The server address could not be turned into a tracking endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The transport failed to open or broke while open.
    #[error("transport error: {0}")]
    Transport(String),

    /// No bearer token was available when a connection was requested.
    #[error("authentication required: no access token available")]
    AuthRequired,

    /// The client driver has stopped and no longer accepts commands.
    #[error("tracking client has shut down")]
    ClientShutdown,

    // -- Payload errors --
    /// An inbound frame was not a JSON object.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for CrError {
    fn from(e: serde_json::Error) -> Self {
        CrError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CrError {
    fn from(e: toml::de::Error) -> Self {
        CrError::Config(e.to_string())
    }
}

impl From<url::ParseError> for CrError {
    fn from(e: url::ParseError) -> Self {
        CrError::InvalidEndpoint(e.to_string())
    }
}

impl CrError {
    /// Whether the error is recovered by the reconnect loop rather than
    /// surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::MalformedPayload(_))
    }
}
