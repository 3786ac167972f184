//! Incremental `multipart/form-data` parser.
//!
//! The parser never holds more than one part header block plus a
//! delimiter-sized tail of body bytes in memory; part bodies are handed out as
//! chunks as soon as they cannot belong to a delimiter.

mod boundary;
mod header;
mod stream;

pub use boundary::parse_boundary;
pub use header::PartHeader;
pub use stream::MultipartStream;

use intake_core::{Rejection, RejectionKind};
use thiserror::Error;

/// Parser-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultipartError {
    #[error("Content-Type is not multipart/form-data")]
    NotMultipart,

    #[error("Invalid multipart boundary: {0}")]
    InvalidBoundary(String),

    #[error("Part header block exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("{0}")]
    Malformed(String),

    /// The body stream itself failed (client disconnect, read error).
    #[error("Request body stream failed: {0}")]
    Stream(String),
}

impl From<MultipartError> for Rejection {
    fn from(err: MultipartError) -> Self {
        match err {
            MultipartError::Stream(_) => {
                Rejection::new(RejectionKind::StorageWriteFailed, err.to_string())
            }
            _ => Rejection::malformed(err.to_string()),
        }
    }
}
