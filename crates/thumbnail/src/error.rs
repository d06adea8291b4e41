//! Thumbnail Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A thumbnail error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for thumbnail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source file does not exist (or can't be inspected).
    #[display("source not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The source path can't be expressed as a `file://` URI.
    #[display("cannot address path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// No valid cached thumbnail, and generating one was not allowed.
    #[display("no cached thumbnail for {}", _0.display())]
    NotCached(#[error(not(source))] PathBuf),
    /// The archive contains no image that could serve as a cover.
    #[display("no cover image in {}", _0.display())]
    NoCover(#[error(not(source))] PathBuf),
    /// The archive layer failed; the wrapped error says how.
    #[display("archive error")]
    Archive,
    /// The image (or the stored thumbnail) could not be decoded or encoded.
    #[display("could not decode or encode image")]
    Decode,
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
