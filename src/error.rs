//! Failure taxonomy.
//!
//! Each collaborator has its own error type; `InvestigationError` is what a
//! pipeline returns when an investigation cannot finish, and `ErrorKind` is
//! the serializable tag handed to the caller for user-facing messaging.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from the embedding and knowledge indices.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The backing store is closed or the query embedding could not be computed.
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TicketSourceError {
    #[error("Ticket not found: {0}")]
    NotFound(String),

    #[error("Access denied to ticket {0}")]
    AccessDenied(String),

    #[error("Ticket source error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum LogSearchError {
    #[error("Log search failed: {0}")]
    Backend(String),

    #[error("Log search timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture not found: {0}")]
    NotFound(String),

    #[error("Invalid capture file: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Reasoning backend failed: {0}")]
    Backend(String),

    #[error("Reasoning backend timed out after {0:?}")]
    Timeout(Duration),
}

/// Terminal failures of an investigation.
#[derive(Error, Debug)]
pub enum InvestigationError {
    #[error("Unroutable request: {0}")]
    UnroutableRequest(String),

    #[error("Ticket fetch failed: {0}")]
    TicketFetch(#[from] TicketSourceError),

    /// Every log search failed.
    #[error("Log correlation unavailable: {0}")]
    CorrelationUnavailable(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Code retrieval failed: {0}")]
    Retrieval(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Investigation cancelled")]
    Cancelled,
}

impl InvestigationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnroutableRequest(_) => ErrorKind::UnroutableRequest,
            Self::TicketFetch(_) => ErrorKind::TicketFetchError,
            Self::CorrelationUnavailable(_) => ErrorKind::CorrelationUnavailable,
            Self::Index(_) => ErrorKind::IndexUnavailable,
            Self::Retrieval(_) => ErrorKind::RetrievalError,
            Self::Synthesis(_) => ErrorKind::SynthesisError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Error tag surfaced to the caller alongside a failed investigation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnroutableRequest,
    TicketFetchError,
    CorrelationUnavailable,
    IndexUnavailable,
    RetrievalError,
    SynthesisError,
    Cancelled,
}
