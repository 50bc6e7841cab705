//! Error types for the codecs

use thiserror::Error;

/// Errors raised while encoding or decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// A reading could not be split into its required fields
    #[error("Malformed reading '{reading}': {reason}")]
    MalformedReading { reading: String, reason: String },

    /// Separator configuration cannot produce an unambiguous stream
    #[error("Invalid separators: {0}")]
    InvalidSeparators(String),

    /// XML document could not be written or parsed
    #[error("XML error: {0}")]
    Xml(String),
}

impl CodecError {
    pub(crate) fn malformed(reading: &str, reason: impl Into<String>) -> Self {
        CodecError::MalformedReading {
            reading: reading.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
