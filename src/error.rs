use thiserror::Error;

use crate::document::types::PayloadError;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message header: {0}")]
    InvalidHeader(String),

    #[error("Connection closed")]
    Closed,

    #[error("Request {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Server error for {method}: {message}")]
    Server { method: String, message: String },
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Server session is not ready")]
    NotReady,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("No virtual document for {0}")]
    NoResult(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(
        "No Python interpreter {requirement} found. Install Python, set `server.pythonPath`, \
         or install the server manually and set `server.path`."
    )]
    NoInterpreter { requirement: String },

    #[error(
        "Installing {package} failed: {reason}. Install it manually with \
         `{interpreter} -m pip install {package}`."
    )]
    InstallFailed {
        interpreter: String,
        package: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No active McCode document")]
    NoActiveDocument,

    #[error("{0} is not a McCode instrument or component")]
    NotMcCode(String),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to start server `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Server handshake failed: {0}")]
    Handshake(#[from] ConnectionError),
}
