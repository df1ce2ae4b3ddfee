// Error taxonomy for encoding and decoding LERC blobs.
//
// Every error is terminal for the call that produced it: the codec never
// retries or degrades, and never hands back a partially decoded raster.

use thiserror::Error;

use crate::raster::DataType;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LercError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LercError {
    /// Bad magic tag, unknown version, zero dimensions or inconsistent
    /// header fields.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The buffer ends before the content its header or sections declare.
    #[error("truncated stream: needed {needed} more bytes at offset {offset}")]
    TruncatedStream { offset: usize, needed: usize },

    /// Structural corruption: varint overflow, section lengths that disagree
    /// with their content, trailing garbage.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// Mask run lengths do not cover the pixel grid exactly.
    #[error("corrupt mask: {0}")]
    CorruptMask(String),

    /// A tile marker byte matches none of the known tile encodings.
    #[error("unsupported tile marker {marker:#04X} at offset {offset}")]
    UnsupportedTileMarker { marker: u8, offset: usize },

    /// Zero tolerance was requested for samples that are not integral.
    #[error("lossless encoding requires integral samples, found {value}")]
    LossyRequired { value: f64 },

    /// A decoded sample does not fit the requested type and clamping is off.
    #[error("value {value} is outside the range of {data_type:?}")]
    TypeRange { value: f64, data_type: DataType },

    #[error("checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Caller-declared dimensions disagree with the blob header.
    #[error("dimension mismatch: blob is {expected}, caller asked for {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl LercError {
    pub(crate) fn truncated(offset: usize, needed: usize) -> Self {
        Self::TruncatedStream { offset, needed }
    }
}
