//! Streams with a declared exact length.
//!
//! The sized filter exposes exactly `size` bytes of its parent and fails when the parent turns
//! out to be longer or shorter, so a caller trusting a length stored elsewhere (an index, a
//! header) never reads more than it expects and notices when the data doesn't match it.

use crate::stream::{Filter, IStream, Metadata, Options, ReadStatus, StreamCore, StreamError};
use std::{fmt, io};

/// Free buffer space to have available before copying from the parent.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// What a mismatch handler gets to describe the disagreement with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeMismatch {
    /// Logical offset of the sized stream when the mismatch was noticed.
    pub offset: u64,
    /// Bytes the parent has available from `offset` onwards.
    pub new_bytes: u64,
    /// The declared size.
    pub wanted_size: u64,
    /// Whether the parent had reached its end.
    pub eof: bool,
}

impl SizeMismatch {
    /// Length of the stream as far as it is known.
    pub fn actual_size(&self) -> u64 {
        self.offset + self.new_bytes
    }
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actual_size() < self.wanted_size {
            write!(
                f,
                "stream is smaller than expected ({} < {})",
                self.actual_size(),
                self.wanted_size
            )
        } else {
            write!(
                f,
                "stream is larger than expected ({} > {}, eof={})",
                self.actual_size(),
                self.wanted_size,
                self.eof
            )
        }
    }
}

/// Produces the diagnostic message for a size mismatch.
pub type MismatchHandler = Box<dyn FnMut(&SizeMismatch) -> String>;

/// Filter cutting its parent to an exact size.
pub struct SizedFilter {
    parent: IStream,
    size: u64,
    parent_start_offset: u64,
    handler: MismatchHandler,
}

impl fmt::Debug for SizedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedFilter")
            .field("parent", &self.parent)
            .field("size", &self.size)
            .field("parent_start_offset", &self.parent_start_offset)
            .finish_non_exhaustive()
    }
}

/// Creates a stream exposing exactly `size` bytes of `parent`, starting from its current offset.
pub fn create(parent: IStream, size: u64) -> IStream {
    create_with_callback(parent, size, |mismatch: &SizeMismatch| mismatch.to_string())
}

/// Like [`create`], with `handler` producing the error message on a mismatch.
pub fn create_with_callback(
    parent: IStream,
    size: u64,
    handler: impl FnMut(&SizeMismatch) -> String + 'static,
) -> IStream {
    let options = Options::inherit(&parent);
    IStream::new(
        SizedFilter {
            parent_start_offset: parent.offset(),
            parent,
            size,
            handler: Box::new(handler),
        },
        options,
    )
}

impl SizedFilter {
    fn mismatch(&mut self, core: &mut StreamCore, mismatch: &SizeMismatch) -> io::Error {
        let message = (self.handler)(mismatch);
        tracing::error!("read({}) failed: {message}", core.name());
        core.fail(StreamError::new(io::ErrorKind::InvalidData, message))
    }

    fn parent_vanished(&self) -> bool {
        self.parent
            .last_error()
            .is_some_and(|err| err.kind() == io::ErrorKind::NotFound)
    }
}

impl Filter for SizedFilter {
    fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus> {
        let high = core.high_offset();
        if high >= self.size || self.parent_vanished() {
            return Ok(ReadStatus::EndOfStream);
        }

        core.buffer.compress();
        if let Err(err) = self.parent.seek(self.parent_start_offset + high, false) {
            return Err(core.propagate(&self.parent, &err));
        }

        let mut parent_eof = false;
        let mut vanished = false;
        while self.parent.data().is_empty() {
            match self.parent.read() {
                Ok(ReadStatus::NewData(_)) => {}
                Ok(ReadStatus::NoDataYet) => return Ok(ReadStatus::NoDataYet),
                Ok(ReadStatus::BufferFull) => return Ok(ReadStatus::BufferFull),
                Ok(ReadStatus::EndOfStream) => {
                    parent_eof = true;
                    break;
                }
                // lost the resource, the caller may be racing its deletion
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    parent_eof = true;
                    vanished = true;
                    break;
                }
                Err(err) => return Err(core.propagate(&self.parent, &err)),
            }
        }

        let buffered = core.buffer.available_len() as u64;
        let new_bytes = buffered + self.parent.data().len() as u64;
        let left = self.size - core.v_offset;
        let mismatch = SizeMismatch {
            offset: core.v_offset,
            new_bytes,
            wanted_size: self.size,
            eof: parent_eof,
        };

        let wanted = (left - buffered).min(self.parent.data().len() as u64) as usize;
        let copied = if wanted > 0 && core.make_room(wanted.min(READ_CHUNK_SIZE), false) {
            core.buffer.fill_from(&self.parent.data()[..wanted])
        } else {
            0
        };
        self.parent.consume(copied);

        if new_bytes > left {
            // never expose anything past the declared size
            let err = self.mismatch(core, &mismatch);
            core.set_eof();
            return if copied > 0 {
                Ok(ReadStatus::NewData(copied))
            } else {
                Err(err)
            };
        }

        if wanted > 0 && copied == 0 {
            return Ok(ReadStatus::BufferFull);
        }
        if core.high_offset() == self.size {
            core.set_eof();
        } else if parent_eof && !vanished {
            return Err(self.mismatch(core, &mismatch));
        }

        if copied > 0 {
            Ok(ReadStatus::NewData(copied))
        } else {
            Ok(ReadStatus::EndOfStream)
        }
    }

    fn stat(&mut self, core: &mut StreamCore, _exact: bool) -> io::Result<Metadata> {
        // The parent may be expensive to stat exactly (a decompressing stream) and the size is
        // already known.
        match self.parent.stat(false) {
            Ok(metadata) => Ok(Metadata {
                size: self.size,
                ..metadata
            }),
            Err(err) => Err(core.propagate(&self.parent, &err)),
        }
    }

    fn parent(&self) -> Option<&IStream> {
        Some(&self.parent)
    }

    fn parent_mut(&mut self) -> Option<&mut IStream> {
        Some(&mut self.parent)
    }

    fn into_parent(mut self: Box<Self>, core: &mut StreamCore) -> Option<IStream> {
        // get to the same position in the parent stream
        let offset = self.parent_start_offset + core.v_offset;
        if self.parent.is_seekable() || offset > self.parent.offset() {
            if let Err(err) = self.parent.seek(offset, false) {
                tracing::debug!(name = core.name(), "couldn't reposition parent: {err}");
            }
        }
        Some(self.parent)
    }
}
