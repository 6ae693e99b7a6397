//! Error types for the unit agent.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, validating or running operations.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Operation state violates the kind-specific population rules.
    #[error("invalid operation state: {0}")]
    InvalidState(String),

    /// Hook info does not match its hook kind.
    #[error("invalid hook: {0}")]
    InvalidHook(String),

    /// Action ids must be non-empty.
    #[error("empty action id")]
    EmptyActionId,

    /// A callback reported an infrastructure failure.
    #[error("{op}: {source}")]
    Callback {
        op: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step of an operation failed.
    #[error("{step} operation \"{op}\": {source}")]
    Step {
        step: &'static str,
        op: String,
        #[source]
        source: Box<OperationError>,
    },

    /// Durable state could not be read or written.
    #[error(transparent)]
    StateFile(#[from] StateFileError),
}

/// Errors from the on-disk state file.
#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("reading state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writing state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("decoding state file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Hard errors from a resolver. "Nothing to do" and "do not proceed" are
/// not errors, see [`crate::resolver::Decision`].
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The remote pending action list cannot be interpreted.
    #[error("malformed pending action list: {0}")]
    MalformedPending(String),

    /// The local state contradicts itself.
    #[error("invalid local state: {0}")]
    InvalidLocalState(String),

    /// The operation factory refused to build an operation.
    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Errors that end the dispatch loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("dispatch loop aborted")]
    Aborted,

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("idle callback failed: {0}")]
    Idle(#[source] anyhow::Error),
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;
