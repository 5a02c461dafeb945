use std::io;
use thiserror::Error;

/// Result type for television client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the television client
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation needs an open connection
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Pairing error
    #[error("Pairing error: {0}")]
    Pairing(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Secondary channel encryption error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Websocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialize(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialize(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}
