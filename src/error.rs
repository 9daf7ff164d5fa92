//! Crate-level error type.
//!
//! Library functions return `Result<_, ReviewError>`. The router and the chat
//! client convert most of these into user-facing notices or chat bubbles at the
//! boundary where they occur; they only surface to callers when there is no
//! sensible fallback (bad configuration, unknown stage names from the CLI).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// The session store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted blob or a response body was not valid JSON for its type.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The remote server answered with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Connection, timeout or body read failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No response head arrived within the configured request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A single stream frame could not be decoded.
    #[error("malformed frame: {detail}")]
    MalformedFrame { detail: String },

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    /// The `backup` URL parameter was not valid base64 JSON.
    #[error("invalid session backup: {0}")]
    Backup(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The in-flight request was aborted by the host (page teardown).
    #[error("request aborted")]
    Aborted,
}

impl From<std::io::Error> for ReviewError {
    fn from(e: std::io::Error) -> Self {
        ReviewError::Storage(e.to_string())
    }
}

impl From<toml::de::Error> for ReviewError {
    fn from(e: toml::de::Error) -> Self {
        ReviewError::Config(e.to_string())
    }
}
