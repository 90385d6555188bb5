//! Error types for Scouter
//!
//! Per-probe errors end up as the `message` of a failed outcome, so their
//! `Display` text is what clients read.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScouterError {
    /// Malformed or out-of-range probe option.
    #[error("{0}")]
    Validation(String),

    /// A destination or nameserver name could not be resolved.
    #[error("Unable to resolve host '{0}'.")]
    Resolution(String),

    /// No nameserver answered a DNS lookup.
    #[error("Unable to get an answer back from any of the following nameservers: {0:?}")]
    NoAnswer(Vec<String>),

    /// Packet send/receive or HTTP transport failure.
    #[error("{0}")]
    Transport(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Batch exceeds the configured probe ceiling.
    #[error("Provided number of tests is too high. Max: {max}")]
    Capacity { max: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown, deleted or expired receipt.
    #[error("Receipt '{0}' was not found.")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ScouterError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Batch-level errors reject a submission before any probe runs.
    #[inline]
    #[must_use]
    pub const fn is_batch_error(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::Validation(_))
    }
}

/// Result type alias for Scouter operations
pub type ScouterResult<T> = Result<T, ScouterError>;
