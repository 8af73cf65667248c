//! Error types for reporter operations.

use crate::sender::SendError;
use thiserror::Error;

/// Why a single span was not accepted by [`AsyncReporter::report`].
///
/// None of these are fatal: the span has already been counted as dropped
/// when the error is returned, and the caller is free to ignore it.
///
/// [`AsyncReporter::report`]: crate::AsyncReporter::report
#[derive(Debug, Error)]
pub enum ReportError {
    /// The queue is at its record or byte limit.
    #[error("queue is full")]
    CapacityExceeded,

    /// The encoded span can never fit into a message.
    #[error("record of {size} bytes exceeds the {max} byte limit")]
    OversizedRecord { size: usize, max: usize },

    /// The reporter has been closed.
    #[error("reporter is closed")]
    Closed,

    /// The span could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl ReportError {
    /// Returns `true` if retrying later may succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CapacityExceeded)
    }
}

/// Failures that stop the reporter from starting or from shutting down cleanly.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// The sender failed its startup health check.
    #[error("sender check failed: {0}")]
    Check(#[source] SendError),

    /// The sender failed to release its resources.
    #[error("sender close failed: {0}")]
    Close(#[source] SendError),

    /// The flusher did not finish within the close timeout.
    #[error("timed out closing reporter, dropped {dropped} queued records")]
    CloseTimedOut { dropped: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The reporter was closed before the request could run.
    #[error("reporter is closed")]
    Closed,

    /// The flusher task is no longer running.
    #[error("flusher task is gone")]
    FlusherGone,
}

/// Invalid reporter or batch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("message_max_bytes {message_max_bytes} must exceed the {overhead} byte framing overhead")]
    MessageTooSmall {
        message_max_bytes: usize,
        overhead: usize,
    },

    #[error("message_max_bytes {requested} exceeds the sender limit of {sender_max}")]
    MessageTooLarge { requested: usize, sender_max: usize },

    #[error("encoder produces {encoder:?} but sender expects {sender:?}")]
    EncodingMismatch {
        encoder: crate::Encoding,
        sender: crate::Encoding,
    },
}

/// A span could not be turned into bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
