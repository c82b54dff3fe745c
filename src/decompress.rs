//! Transparent decompression of a parent stream.
//!
//! The codecs can only decode forwards, so seeking backwards past the retained buffer restarts
//! decoding from the beginning of the parent: the cost of a seek is proportional to its distance
//! from the start of the stream, not constant. The decompressed size isn't known until the codec
//! reports the end of the stream, which is why an exact [`IStream::stat`] may have to decode
//! everything.

use crate::{
    codec::{Decode, DecodeError, DecodeStatus},
    fatal::{fatal, FatalStatus},
    stream::{
        seek_forward, Filter, IStream, Metadata, More, Options, ReadStatus, StreamCore,
        StreamError,
    },
    util::PartialBuffer,
};
use std::io;

/// Free buffer space to have available before each decode.
const CHUNK_SIZE: usize = 64 * 1024;

/// Filter decompressing its parent stream with a [`Decode`] implementation.
#[derive(Debug)]
pub struct DecompressFilter<D> {
    parent: IStream,
    /// Released on close.
    decoder: Option<D>,
    parent_start_offset: u64,
    /// Logical offset where the decompressed data ends, once the codec reached it.
    eof_offset: Option<u64>,
    /// Total decompressed length, survives resets.
    stream_size: Option<u64>,
    /// End of the filled buffer before a seek backwards within it, `0` when unset.
    high_pos: usize,
    marked: bool,
    log_errors: bool,
    last_parent_stat: Option<Metadata>,
    pending_restore: Option<PendingRestore>,
}

/// An offset an exact stat couldn't return to because the parent had no data yet.
///
/// While it is set the core reports `target` as its offset with nothing buffered, and decoding
/// really stands at `decoded`.
#[derive(Clone, Copy, Debug)]
struct PendingRestore {
    target: u64,
    decoded: u64,
}

/// Creates a stream decompressing `parent` with `decoder`.
///
/// With `log_errors` set, corrupted input is also logged when it is detected, in addition to
/// failing the stream.
pub fn create<D: Decode + 'static>(mut parent: IStream, decoder: D, log_errors: bool) -> IStream {
    let options = Options::inherit(&parent);
    let last_parent_stat = parent.stat(false).ok();

    IStream::new(
        DecompressFilter {
            parent_start_offset: parent.offset(),
            parent,
            decoder: Some(decoder),
            eof_offset: None,
            stream_size: None,
            high_pos: 0,
            marked: false,
            log_errors,
            last_parent_stat,
            pending_restore: None,
        },
        options,
    )
}

/// Creates a stream decompressing bzip2 data from `parent`.
#[cfg(feature = "bzip2")]
pub fn create_bz2(parent: IStream, log_errors: bool) -> IStream {
    create(parent, crate::codec::BzDecoder::new(), log_errors)
}

fn read_error(core: &mut StreamCore, codec: &str, log_errors: bool, reason: &str) -> io::Error {
    let error = StreamError::new(
        io::ErrorKind::InvalidData,
        format!(
            "{codec}.read({}): {reason} at {}",
            core.name(),
            core.offset()
        ),
    );
    if log_errors {
        tracing::error!("{error}");
    }
    core.fail(error)
}

fn codec_fatal(codec: &str, name: &str, err: &DecodeError) -> ! {
    let status = match err {
        DecodeError::OutOfMemory => FatalStatus::OutOfMemory,
        _ => FatalStatus::Default,
    };
    fatal(status, &format!("{codec}.read({name}): {err}"))
}

impl<D: Decode> DecompressFilter<D> {
    /// Starts decoding again from the beginning of the parent.
    ///
    /// Fails without touching any state when the parent can't be repositioned.
    fn reset(&mut self, core: &mut StreamCore) -> io::Result<()> {
        tracing::debug!(name = core.name(), "restarting decompression from the start");

        if let Err(err) = self.parent.seek(self.parent_start_offset, false) {
            return Err(core.propagate(&self.parent, &err));
        }
        self.eof_offset = None;
        self.high_pos = 0;
        self.pending_restore = None;
        core.buffer.clear();
        core.v_offset = 0;
        core.eof = false;

        if let Some(decoder) = &mut self.decoder {
            decoder.reinit();
        }
        Ok(())
    }

    /// Reports `target` as the offset until a later read manages to get there.
    fn defer_restore(&mut self, core: &mut StreamCore, target: u64) {
        debug_assert_eq!(core.buffer.available_len(), 0);
        self.pending_restore = Some(PendingRestore {
            target,
            decoded: core.v_offset,
        });
        core.v_offset = target;
    }

    /// Goes back to where decoding really is, dropping a deferred restore.
    fn cancel_restore(&mut self, core: &mut StreamCore) {
        if let Some(pending) = self.pending_restore.take() {
            core.v_offset = pending.decoded;
        }
    }

    /// Continues a deferred restore, returning `false` if the parent stalled again.
    fn resume_restore(&mut self, core: &mut StreamCore) -> io::Result<bool> {
        let Some(pending) = self.pending_restore.take() else {
            return Ok(true);
        };
        core.v_offset = pending.decoded;
        match seek_forward(self, core, pending.target) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.defer_restore(core, pending.target);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Reads and discards everything up to the end of the stream.
    fn drain(&mut self, core: &mut StreamCore) -> io::Result<()> {
        loop {
            core.consume(core.buffer.available_len());
            match self.read(core)? {
                ReadStatus::NewData(_) => {}
                ReadStatus::EndOfStream => return Ok(()),
                ReadStatus::NoDataYet => return Err(io::ErrorKind::WouldBlock.into()),
                ReadStatus::BufferFull => {
                    return Err(io::Error::other(format!(
                        "stat({}): buffer full at {}",
                        core.name(),
                        core.offset()
                    )))
                }
            }
        }
    }
}

impl<D: Decode> Filter for DecompressFilter<D> {
    fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus> {
        if self.pending_restore.is_some() {
            if !self.resume_restore(core)? {
                return Ok(ReadStatus::NoDataYet);
            }
            let available = core.buffer.available_len();
            if available > 0 {
                return Ok(ReadStatus::NewData(available));
            }
        }

        if self.eof_offset == Some(core.high_offset()) {
            debug_assert!(self.high_pos == 0 || self.high_pos == core.buffer.pos());
            return Ok(ReadStatus::EndOfStream);
        }

        if core.buffer.pos() < self.high_pos {
            // seeked back within the buffer, the data after it is already decoded
            let amount = self.high_pos - core.buffer.pos();
            core.buffer.restore(self.high_pos);
            self.high_pos = 0;

            if self.eof_offset == Some(core.high_offset()) {
                core.set_eof();
            }
            return Ok(ReadStatus::NewData(amount));
        }
        self.high_pos = 0;

        if !core.make_room(CHUNK_SIZE, self.marked) {
            return Ok(ReadStatus::BufferFull);
        }

        let log_errors = self.log_errors;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed"));
        };
        let codec = decoder.name();

        // Every pass either consumes input or fails, so this is bounded by the input length.
        loop {
            let input = match self.parent.read_more() {
                Ok(More::Data(input)) => input,
                Ok(More::NoDataYet) => return Ok(ReadStatus::NoDataYet),
                Ok(More::EndOfStream) => {
                    return Err(read_error(core, codec, log_errors, "unexpected EOF"))
                }
                Err(err) => return Err(core.propagate(&self.parent, &err)),
            };

            let mut input = PartialBuffer::new(input);
            let mut output = PartialBuffer::new(core.buffer.unfilled_mut());
            let result = decoder.decode(&mut input, &mut output);
            let consumed = input.written().len();
            let produced = output.written().len();

            core.buffer.fill(produced);
            self.parent.consume(consumed);

            match result {
                Ok(DecodeStatus::Progress) => {}
                Ok(DecodeStatus::StreamEnd) => {
                    let eof_offset = core.high_offset();
                    debug_assert!(self.stream_size.map_or(true, |size| size == eof_offset));
                    self.eof_offset = Some(eof_offset);
                    self.stream_size = Some(eof_offset);
                    core.set_eof();
                    if produced == 0 {
                        return Ok(ReadStatus::EndOfStream);
                    }
                }
                Err(err) if err.is_fatal() => codec_fatal(codec, core.name(), &err),
                Err(err) => return Err(read_error(core, codec, log_errors, &err.to_string())),
            }

            if produced > 0 {
                return Ok(ReadStatus::NewData(produced));
            }
            if consumed == 0 {
                return Err(read_error(core, codec, log_errors, "decoder made no progress"));
            }
        }
    }

    fn seek(&mut self, core: &mut StreamCore, offset: u64, mark: bool) -> io::Result<()> {
        self.cancel_restore(core);
        let mut start_offset = core.v_offset - core.buffer.skip() as u64;

        if offset < start_offset {
            // have to seek backwards
            self.reset(core)?;
            start_offset = 0;
        } else if self.high_pos != 0 {
            core.buffer.restore(self.high_pos);
            self.high_pos = 0;
        }

        let result = if offset <= start_offset + core.buffer.pos() as u64 {
            // seeking backwards within what's already cached
            core.v_offset = offset;
            self.high_pos = core.buffer.rewind_to((offset - start_offset) as usize);
            Ok(())
        } else {
            // read and cache forward
            match seek_forward(self, core, offset) {
                Err(err) if err.kind() != io::ErrorKind::WouldBlock => {
                    let codec = codec_name(&self.decoder);
                    tracing::error!("{codec}.seek({}) failed: {err}", core.name());
                    Err(err)
                }
                result => result,
            }
        };

        if mark {
            self.marked = true;
        }
        result
    }

    fn stat(&mut self, core: &mut StreamCore, exact: bool) -> io::Result<Metadata> {
        let mut metadata = match self.parent.stat(exact) {
            Ok(metadata) => metadata,
            Err(err) => return Err(core.propagate(&self.parent, &err)),
        };

        // With exact unset always return the parent's size, even if the real one is known.
        // Otherwise callers could see two different sizes and think the resource keeps changing.
        if !exact {
            return Ok(metadata);
        }

        if self.stream_size.is_none() {
            let old_offset = core.v_offset;
            let drained = self.drain(core);
            let restored = match self.seek(core, old_offset, false) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // the parent stalled on the way back, finish on the next read
                    self.defer_restore(core, old_offset);
                    Ok(())
                }
                result => result,
            };
            core.eof =
                self.pending_restore.is_none() && self.eof_offset == Some(core.high_offset());
            drained?;
            restored?;
        }

        match self.stream_size {
            Some(size) => {
                metadata.size = size;
                Ok(metadata)
            }
            None => Err(io::Error::other(format!(
                "stat({}): decompressed size is unknown",
                core.name()
            ))),
        }
    }

    fn sync(&mut self, core: &mut StreamCore) {
        let current = self.parent.stat(false).ok();
        if current.is_some() && current == self.last_parent_stat {
            // compressed data doesn't change unexpectedly, keep what's already decoded
            return;
        }

        tracing::debug!(name = core.name(), "parent changed since last sync");
        self.last_parent_stat = current;
        // the old length belongs to the old contents
        self.stream_size = None;
        self.cancel_restore(core);
        if let Err(err) = self.reset(core) {
            tracing::error!("{}.sync({}) failed: {err}", codec_name(&self.decoder), core.name());
        }
    }

    fn close(&mut self, close_parent: bool) {
        self.decoder = None;
        if close_parent {
            self.parent.close(true);
        }
    }

    fn parent(&self) -> Option<&IStream> {
        Some(&self.parent)
    }

    fn parent_mut(&mut self) -> Option<&mut IStream> {
        Some(&mut self.parent)
    }

    fn into_parent(self: Box<Self>, _core: &mut StreamCore) -> Option<IStream> {
        Some(self.parent)
    }
}

fn codec_name<D: Decode>(decoder: &Option<D>) -> &'static str {
    decoder.as_ref().map_or("decompress", |decoder| decoder.name())
}
