//! Error taxonomy for sync operations.
//!
//! Every failure the library surfaces is a [`SyncError`] carrying a stable,
//! machine-readable [`code`](SyncError::code) plus a human-readable message.
//! Collaborator seams (transport, asset store, renderer) speak
//! `anyhow::Result`; the orchestrator folds those failures into
//! [`SyncError::TransportFailure`] or [`SyncError::RenderingFailure`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::AnnotationState;

pub type SyncResult<T> = Result<T, SyncError>;

/// One code block that failed to produce its expected output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFailure {
    /// Expected output file, as written in the block's `:file` argument.
    pub output: PathBuf,
    pub reason: String,
}

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.output.display(), self.reason)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("malformed structure at line {line}: {message}")]
    MalformedStructure { line: usize, message: String },

    #[error("document has no GDOC_ID; run `orgsync init` first")]
    MissingIdentity,

    #[error("document is already linked to remote document {id}")]
    AlreadyInitialized { id: String },

    #[error("conflict detected: {message}")]
    ConflictDetected { message: String },

    #[error("remote call `{operation}` failed: {message}")]
    TransportFailure {
        operation: &'static str,
        message: String,
    },

    #[error("no annotation with id {id}")]
    NotFound { id: String },

    #[error("annotation {id} is already {state}")]
    AlreadyTerminal { id: String, state: AnnotationState },

    #[error("annotation {id} is not a {expected}")]
    WrongKind { id: String, expected: &'static str },

    #[error("rendering failed: {}", join_failures(.failures))]
    RenderingFailure { failures: Vec<RenderFailure> },

    #[error("{} is held by {holder}; remove it if no other orgsync is running", .path.display())]
    Locked { path: PathBuf, holder: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn join_failures(failures: &[RenderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    /// Stable error code used in CLI output and by editor integrations.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::MalformedStructure { .. } => "malformed_structure",
            SyncError::MissingIdentity => "missing_identity",
            SyncError::AlreadyInitialized { .. } => "already_initialized",
            SyncError::ConflictDetected { .. } => "conflict_detected",
            SyncError::TransportFailure { .. } => "transport_failure",
            SyncError::NotFound { .. } => "not_found",
            SyncError::AlreadyTerminal { .. } => "already_terminal",
            SyncError::WrongKind { .. } => "wrong_kind",
            SyncError::RenderingFailure { .. } => "rendering_failure",
            SyncError::Locked { .. } => "locked",
            SyncError::Config(_) => "config",
            SyncError::Io { .. } => "io",
        }
    }

    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        SyncError::MalformedStructure {
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a collaborator failure. The full `anyhow` chain is flattened
    /// into the message so nothing is lost when the error is printed.
    pub fn transport(operation: &'static str, err: anyhow::Error) -> Self {
        SyncError::TransportFailure {
            operation,
            message: format!("{:#}", err),
        }
    }
}
