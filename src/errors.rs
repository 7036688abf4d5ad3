use std::time::Duration;

use thiserror::Error;

/// Errors that can occur inside the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Unknown command")]
    UnknownCommand,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?} waiting for the host executor")]
    Timeout(Duration),

    #[error("port conflict: {0}")]
    PortConflict(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results using `BridgeError`.
pub type Result<T> = std::result::Result<T, BridgeError>;
