//! Error types for ELF parsing and instrumentation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while decoding or mutating an ELF image.
///
/// Each variant corresponds to one failure class; instrumentation operations
/// validate their preconditions before mutating, so a returned error leaves
/// the file untouched.
#[derive(Debug, Error)]
pub enum Error {
    /// The byte buffer ended before the declared structure finished.
    #[error("truncated input: needed {needed} bytes at offset {offset:#x}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Not a 64-bit little-endian ELF file.
    #[error("unsupported input: {reason}")]
    Unsupported { reason: String },

    /// The file layout does not match what the instrumentation engine
    /// requires (program header table not immediately after the ELF header,
    /// or a required chunk is missing).
    #[error("unsupported layout: {reason}")]
    UnsupportedLayout { reason: String },

    /// The file is structurally inconsistent: overlapping regions, ranges
    /// past end-of-file, or sub-minimum table strides.
    #[error("corrupted input: {reason}")]
    Corrupted { reason: String },

    /// An allocation or patch target does not name a usable file position.
    #[error("bad offset {offset:#x}: {reason}")]
    BadOffset { offset: u64, reason: String },

    /// A grow operation needs more slack than the dummy chunk following the
    /// target provides.
    #[error("insufficient slack after chunk at {offset:#x}: needed {needed}, have {available}")]
    InsufficientSlack {
        offset: u64,
        needed: usize,
        available: usize,
    },

    /// An operation targeted a chunk of the wrong variant.
    #[error("wrong chunk kind at {offset:#x}: expected {expected}, found {found}")]
    WrongChunkKind {
        offset: u64,
        expected: &'static str,
        found: &'static str,
    },
}

impl Error {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Error::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn unsupported_layout(reason: impl Into<String>) -> Self {
        Error::UnsupportedLayout {
            reason: reason.into(),
        }
    }

    pub fn corrupted(reason: impl Into<String>) -> Self {
        Error::Corrupted {
            reason: reason.into(),
        }
    }

    pub fn bad_offset(offset: u64, reason: impl Into<String>) -> Self {
        Error::BadOffset {
            offset,
            reason: reason.into(),
        }
    }
}
