//! Forward-only decompression codecs usable by the decompression filter.

use crate::util::PartialBuffer;
use std::fmt;

#[cfg(feature = "bzip2")]
pub mod bzip2;

#[cfg(feature = "bzip2")]
pub use self::bzip2::BzDecoder;

/// What a single [`Decode::decode`] call achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Some input may have been consumed and some output produced, the stream continues.
    Progress,
    /// The codec reached the end of the compressed stream, no more output will follow.
    StreamEnd,
}

/// Reasons a codec can stop decoding.
///
/// [`Corrupt`](DecodeError::Corrupt) and [`BadHeader`](DecodeError::BadHeader) describe bad input
/// and are recoverable by recreating the stream. The others mean the process environment or the
/// calling code is broken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The compressed data is corrupted.
    Corrupt,
    /// The input doesn't start with a valid header for this format.
    BadHeader(&'static str),
    /// The codec couldn't allocate its working memory.
    OutOfMemory,
    /// The codec was driven with invalid parameters or in an invalid sequence.
    InvalidArguments(String),
}

impl DecodeError {
    /// Returns `true` for conditions that must terminate the process instead of failing the
    /// stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Corrupt | Self::BadHeader(_))
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt => f.write_str("corrupted data"),
            Self::BadHeader(reason) => f.write_str(reason),
            Self::OutOfMemory => f.write_str("Out of memory"),
            Self::InvalidArguments(reason) => write!(f, "Invalid parameters: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Abstraction for decoders.
pub trait Decode: fmt::Debug {
    /// Short name of the format, used to prefix diagnostics (`"bzlib"`).
    fn name(&self) -> &'static str;

    /// Reinitializes this decoder, throwing away all state so that it can decode a stream from
    /// its beginning again.
    ///
    /// Codec libraries only fail to initialize when the process is out of memory or the library
    /// is broken, implementations panic in that case.
    fn reinit(&mut self);

    /// Decode the provided input buffer into the provided output buffer, advancing both by the
    /// amounts consumed and produced.
    fn decode(
        &mut self,
        input: &mut PartialBuffer<&[u8]>,
        output: &mut PartialBuffer<&mut [u8]>,
    ) -> Result<DecodeStatus, DecodeError>;
}
