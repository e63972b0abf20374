//! Error types for fragment and ring item encoding.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding or decoding fragments and ring items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before a complete structure could be read.
    #[error("Truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// A fragment body does not fit the 32-bit size field of the header.
    #[error("Fragment body of {0} bytes exceeds the 32-bit size field")]
    BodyTooLarge(usize),

    /// A ring item declared a size smaller than its own header.
    #[error("Ring item declares size {size}, smaller than the {minimum}-byte header")]
    BadItemSize { size: u32, minimum: usize },

    /// A ring item body header length field was neither 0 nor the body header size.
    #[error("Unsupported body header size {0}")]
    BadBodyHeader(u32),
}
