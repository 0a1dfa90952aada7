//! Unified error types for the uploader core
//!
//! This module defines error types that:
//! - Keep transport, protocol and remote-service failures apart
//! - Mark session expiry so the client can retry exactly once
//! - Render user-facing messages for the status line

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a request never produced a usable HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportFailure {
    #[error("Timed out connecting to remote server.")]
    ConnectTimeout,

    #[error("Timed out reading from remote server.")]
    ReadTimeout,

    #[error("Could not connect to remote server: {0}")]
    Connect(String),

    #[error("Unexpected HTTP status {0}: {1}")]
    Status(u16, String),

    #[error("Transfer aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

/// Error type for every operation of the uploader core
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum UploaderError {
    #[error("{0}")]
    Transport(TransportFailure),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Login failed: {0}")]
    Auth(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Not permitted: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{class}: {message}")]
    Remote { class: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl UploaderError {
    /// Session expiry is the only failure the client retries on its own.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, UploaderError::SessionExpired(_))
    }
}

impl From<TransportFailure> for UploaderError {
    fn from(failure: TransportFailure) -> Self {
        UploaderError::Transport(failure)
    }
}

impl From<reqwest::Error> for UploaderError {
    fn from(err: reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            if err.is_connect() {
                TransportFailure::ConnectTimeout
            } else {
                TransportFailure::ReadTimeout
            }
        } else if err.is_connect() {
            TransportFailure::Connect(err.to_string())
        } else if is_aborted(&err) {
            TransportFailure::Aborted
        } else {
            TransportFailure::Other(err.to_string())
        };
        UploaderError::Transport(failure)
    }
}

/// Walk the source chain looking for the io error raised by an aborted upload body.
fn is_aborted(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionAborted {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

impl From<std::io::Error> for UploaderError {
    fn from(err: std::io::Error) -> Self {
        UploaderError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for UploaderError {
    fn from(err: toml::de::Error) -> Self {
        UploaderError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for UploaderError {
    fn from(err: serde_json::Error) -> Self {
        UploaderError::Parse(err.to_string())
    }
}

impl From<quick_xml::DeError> for UploaderError {
    fn from(err: quick_xml::DeError) -> Self {
        UploaderError::Parse(err.to_string())
    }
}

/// Result type alias using UploaderError
pub type Result<T> = std::result::Result<T, UploaderError>;
