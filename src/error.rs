//! Error types for layered field compression.

use thiserror::Error;

/// Error variants for encoding and decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The encoded output would exceed the pre-declared capacity.
    ///
    /// Raised by the layered encoder when the sum of all layer streams grows
    /// past [`crate::layered::Capacity::max_encoded_bytes`].
    #[error("encoded buffer overflow: need {required} bytes, capacity is {capacity}")]
    BufferOverflow {
        /// Bytes the encoder would have needed so far.
        required: usize,
        /// The configured maximum.
        capacity: usize,
    },

    /// The encoded stream is malformed (bad table, wrong counts, bad header).
    #[error("invalid encoded stream: {0}")]
    Format(String),

    /// The range decoder ran out of input bytes.
    #[error("truncated stream: no byte available at offset {position}")]
    TruncatedStream {
        /// Read cursor at the time of the failure.
        position: usize,
    },

    /// The caller supplied inconsistent or unusable input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The decorrelation transform rejected the grid.
    #[error("transform failed: {0}")]
    Transform(String),
}

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
