//! Error types for mockwire.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors in the wire protocol or the recorded trace.
///
/// An unclassifiable message is fatal for its connection only; a malformed
/// recorded entry aborts resolving that one entry, never the whole run.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no traffic kind matches message starting {preview:?}")]
    UnknownKind { preview: String },

    #[error("unknown response kind in recording: {tag}")]
    UnknownResponseKind { tag: String },

    #[error("malformed recorded entry at line {line}: {reason}")]
    MalformedEntry { line: usize, reason: &'static str },
}

impl ProtocolError {
    pub fn unknown_kind(message: &str) -> Self {
        let preview: String = message.chars().take(40).collect();
        Self::UnknownKind { preview }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}
