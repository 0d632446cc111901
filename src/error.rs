//! Error types for the cards service.

/// Top-level error type for the cards service.
#[derive(Debug, thiserror::Error)]
pub enum CardsError {
    /// Persistent store read or write failure.
    #[error("store error: {0}")]
    Store(String),

    /// Network-level failure talking to the cards server.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The cards server answered with a non-OK status.
    #[error("server returned status {status} for {endpoint}")]
    Status {
        /// Endpoint name (`notifications` or `dismiss`).
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// Server payload could not be parsed or failed schema validation.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Notification display service failure.
    #[error("display error: {0}")]
    Display(String),

    /// Location provider failure.
    #[error("location error: {0}")]
    Location(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CardsError>;
