use std::path::PathBuf;

use thiserror::Error;

use crate::engine::StreamState;

/// Errors raised by the shared file cache and the file access modes.
#[derive(Error, Debug)]
pub enum FileCacheError {
    #[error("failed to open {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A release without a matching acquire. This is a programming error
    /// in the caller, never a runtime condition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Errors raised by a [`MediaFormat`](crate::format::MediaFormat) while
/// loading an index or materializing a frame.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of file reached at offset {offset}")]
    EndOfFile { offset: u64 },

    #[error("corrupt frame at index {index}: {reason}")]
    CorruptFrame { index: u32, reason: String },

    #[error("format requires a seek file")]
    MissingSeekFile,

    #[error("corrupt seek file: {0}")]
    Corrupt(String),

    #[error("capabilities error: {0}")]
    Capabilities(#[from] serde_json::Error),
}

impl FormatError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }
}

/// Errors surfaced by the stream engine to the session layer.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Fatal to the engine instance; the engine is left `Stopped`.
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("metadata resolution failed: {0}")]
    MetadataResolution(String),

    /// Recoverable: the signal is rejected and the engine keeps its state.
    #[error("seek to {requested_ms}ms is out of range (duration {duration_ms}ms)")]
    SeekOutOfRange { requested_ms: u64, duration_ms: u64 },

    /// Recoverable: the signal is not valid in the current state.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: StreamState,
    },

    #[error("corrupt frame {index}: {reason}")]
    CorruptFrame { index: u32, reason: String },

    #[error("unexpected end of file at frame {index}")]
    EndOfFile { index: u32 },

    #[error(transparent)]
    FileOpen(FileCacheError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<FileCacheError> for StreamError {
    fn from(err: FileCacheError) -> Self {
        match err {
            FileCacheError::InvariantViolation(msg) => Self::InvariantViolation(msg),
            open @ FileCacheError::FileOpen { .. } => Self::FileOpen(open),
        }
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
