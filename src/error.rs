//! Error types.
//!
//! Per-frame decode failures are data, not errors: they end up in the issue
//! log as [`DecodeIssue`](crate::model::DecodeIssue)s. The types here cover the
//! decoder boundary, the capture source, and the top-level entry points.

use thiserror::Error;

/// How a decoder failed on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorKind {
    /// The bytes do not form a valid frame of the claimed protocol.
    Malformed,
    /// The link or network protocol is not one the decoder understands.
    Unsupported,
    /// The decoder cannot continue at all; stops the whole pass.
    InsufficientData,
}

/// Failure reported by a [`FrameDecoder`](crate::decoder::FrameDecoder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
}

impl DecodeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::Malformed,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::Unsupported,
            message: message.into(),
        }
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::InsufficientData,
            message: message.into(),
        }
    }
}

/// Errors from reading a capture file.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Opening or reading the underlying file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input is not a pcap or pcapng file
    #[error("unrecognized capture format: {0}")]
    Format(String),

    /// The file ends in the middle of a record
    #[error("capture ends mid-frame after {frames} frames")]
    Truncated { frames: usize },

    /// Any other parser failure
    #[error("capture read error: {0}")]
    Read(String),
}

impl CaptureError {
    /// True when the source ran out of bytes mid-frame.
    ///
    /// The accumulator turns this into a terminal issue instead of failing.
    pub fn is_premature_end(&self) -> bool {
        matches!(self, CaptureError::Truncated { .. })
    }
}

/// Top-level error for the library entry points and the binary.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// A connection key given as text could not be parsed
    #[error("invalid connection key {input:?}: {reason}")]
    InvalidKey { input: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Terminal setup or drawing failed
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
