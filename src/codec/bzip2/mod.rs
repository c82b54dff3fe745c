//! The bzip2 format, through libbz2.

mod decoder;

pub use self::decoder::BzDecoder;
