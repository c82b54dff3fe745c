//! Composable pull-based input streams with transparent filters.
//!
//! An [`IStream`] is a buffered byte stream that a consumer pulls from: it looks at
//! [`IStream::data`], [`consume`](IStream::consume)s what it used and calls
//! [`read`](IStream::read) when it needs more. Streams stack, a filter wraps a parent stream and
//! transforms what it reads from it, so higher layers can read through decompression or length
//! enforcement without knowing what the data is stored as.
//!
//! ```
//! use filter_istream::{sized, IStream};
//! use std::io::Read;
//!
//! let mut stream = sized::create(IStream::from_bytes(&b"hello"[..]), 5);
//! let mut output = String::new();
//! stream.read_to_string(&mut output).unwrap();
//! assert_eq!(output, "hello");
//!
//! // a parent longer than the declared size is an error
//! let mut stream = sized::create(IStream::from_bytes(&b"hello world"[..]), 5);
//! let mut output = vec![];
//! let err = stream.read_to_end(&mut output).unwrap_err();
//! assert_eq!(err.to_string(), "stream is larger than expected (11 > 5, eof=false)");
//! assert_eq!(output, b"hello");
//! ```
//!
//! # Streams
//!
//!  Constructor | Does
//! -------------|------
//!  [`IStream::from_bytes`] | Reads in-memory data.
//!  [`IStream::open`] | Reads a file.
//!  [`decompress::create`] | Decompresses its parent with any [`codec::Decode`] implementation.
//!  [`sized::create`] | Exposes exactly `size` bytes of its parent.
//!
//! # Feature Organization
//!
//! The decompression codecs are selected via Cargo features. If you want to pull in everything
//! there is a group feature defined:
//!
//!  Feature | Does
//! ---------|------
//!  `all`   | Activates all algorithms.
//!  `all-algorithms` | Activates all algorithms.
//!
//! ## Compression algorithm
//!
//!  Feature | Types
//! ---------|------
#![cfg_attr(
    feature = "bzip2",
    doc = "`bzip2` (*default*) | [`BzDecoder`](codec::BzDecoder), [`create_bz2`](decompress::create_bz2)"
)]
#![cfg_attr(
    not(feature = "bzip2"),
    doc = "`bzip2` (*inactive*) | `BzDecoder`, `create_bz2`"
)]
//!
//! # Logging
//!
//! Failures are reported through [`tracing`] when they are detected, install a subscriber to
//! see them. Errors that can't be recovered from, like a codec running out of memory, terminate
//! the process, see [`fatal`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_copy_implementations,
    missing_debug_implementations
)]

pub mod codec;
pub mod decompress;
pub mod fatal;
pub mod sized;
pub mod source;
pub mod stream;
pub mod util;

pub use crate::stream::{IStream, Metadata, Options, ReadStatus, StreamError};
