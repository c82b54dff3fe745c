//! The buffered pull-stream engine every filter is built on.
//!
//! An [`IStream`] owns a [`WindowBuffer`] of bytes ready for the consumer and a [`Filter`] that
//! knows how to produce more of them, usually by pulling from a parent stream. Consumers look at
//! [`IStream::data`], [`IStream::consume`] what they used and call [`IStream::read`] when they
//! need more.

mod error;

pub use self::error::StreamError;

use crate::util::WindowBuffer;
use std::{
    fmt,
    io::{self, BufRead, Read, Seek, SeekFrom},
    time::SystemTime,
};

/// Buffer cap used by root streams unless configured otherwise.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 128 * 1024;

/// Outcome of a successful [`IStream::read`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many new bytes were appended to [`IStream::data`].
    NewData(usize),
    /// Nothing is available right now, try again once the underlying source is readable.
    ///
    /// Only returned by non-blocking streams.
    NoDataYet,
    /// The stream has ended, repeated reads keep returning this.
    EndOfStream,
    /// The buffer reached its maximum size, [`consume`](IStream::consume) some of it first.
    BufferFull,
}

/// Metadata of the resource behind a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Length in bytes.
    pub size: u64,
    /// Last modification time, when the resource has one.
    pub modified: Option<SystemTime>,
}

/// Construction-time configuration of a stream.
#[derive(Clone, Debug)]
pub struct Options {
    /// Size the buffer may grow to before reads report [`ReadStatus::BufferFull`].
    pub max_buffer_size: usize,
    /// Whether reads wait for data, a non-blocking stream may return [`ReadStatus::NoDataYet`].
    pub blocking: bool,
    /// Whether the stream can be repositioned backwards.
    pub seekable: bool,
    /// Name used in diagnostics, filters default to their parent's.
    pub name: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            blocking: true,
            seekable: true,
            name: None,
        }
    }
}

impl Options {
    /// Options for a filter wrapping `parent`, which inherits its capabilities and buffer cap.
    pub fn inherit(parent: &IStream) -> Self {
        Self {
            max_buffer_size: parent.max_buffer_size(),
            blocking: parent.is_blocking(),
            seekable: parent.is_seekable(),
            name: Some(parent.name().to_owned()),
        }
    }
}

/// State shared by every stream regardless of its filter.
#[derive(Debug)]
pub struct StreamCore {
    pub(crate) buffer: WindowBuffer,
    pub(crate) v_offset: u64,
    pub(crate) eof: bool,
    blocking: bool,
    seekable: bool,
    max_buffer_size: usize,
    name: String,
    error: Option<StreamError>,
    closed: bool,
}

impl StreamCore {
    fn new(options: Options) -> Self {
        Self {
            buffer: WindowBuffer::new(),
            v_offset: 0,
            eof: false,
            blocking: options.blocking,
            seekable: options.seekable,
            max_buffer_size: options.max_buffer_size.max(1),
            name: options.name.unwrap_or_default(),
            error: None,
            closed: false,
        }
    }

    /// The buffer holding this stream's data.
    pub fn buffer(&self) -> &WindowBuffer {
        &self.buffer
    }

    /// Mutable access to the buffer, for filters appending what they produced.
    pub fn buffer_mut(&mut self) -> &mut WindowBuffer {
        &mut self.buffer
    }

    /// Logical offset of the first available byte.
    pub fn offset(&self) -> u64 {
        self.v_offset
    }

    /// Moves the logical offset, callers are responsible for the buffer matching it.
    pub fn set_offset(&mut self, offset: u64) {
        self.v_offset = offset;
    }

    /// Logical offset just past the last buffered byte.
    pub fn high_offset(&self) -> u64 {
        self.v_offset + self.buffer.available_len() as u64
    }

    /// Marks `amount` available bytes as used, advancing the offset.
    pub fn consume(&mut self, amount: usize) {
        self.buffer.consume(amount);
        self.v_offset += amount as u64;
    }

    /// Marks that nothing follows the currently buffered bytes.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Whether reads wait for data.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Whether the stream can be repositioned backwards.
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Size the buffer may grow to.
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The recorded failure, if any.
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    /// Records `error` as the stream's failure and returns it for propagation.
    ///
    /// Only the first failure is kept.
    pub fn fail(&mut self, error: StreamError) -> io::Error {
        self.error.get_or_insert(error).to_io_error()
    }

    /// Records the failure of `parent` as this stream's failure, keeping its classification and
    /// message. `err` is used when the parent didn't record anything itself.
    pub fn propagate(&mut self, parent: &IStream, err: &io::Error) -> io::Error {
        let error = parent
            .last_error()
            .cloned()
            .unwrap_or_else(|| StreamError::from(err));
        self.fail(error)
    }

    /// Makes sure there's free space for at least one more byte, preferably `min_free`.
    ///
    /// Consumed bytes are dropped early unless the consumer set a seek mark, then the buffer is
    /// grown up to the configured maximum. Returns `false` when the buffer is full even after
    /// dropping every consumed byte.
    pub fn make_room(&mut self, min_free: usize, marked: bool) -> bool {
        if self.buffer.free_len() >= min_free {
            return true;
        }

        if !marked && self.buffer.skip() > 0 {
            self.buffer.compress();
        }
        if self.buffer.capacity() < self.max_buffer_size
            && self.buffer.grow(min_free, self.max_buffer_size)
        {
            tracing::trace!(
                name = %self.name,
                capacity = self.buffer.capacity(),
                "grew stream buffer"
            );
        }

        if self.buffer.free_len() == 0 {
            // lose the retained window
            self.buffer.compress();
            if self.buffer.free_len() == 0 {
                return false;
            }
        }
        true
    }
}

/// The variant-specific half of a stream.
///
/// Root sources and filters implement this, [`IStream`] supplies the buffer, the cursors and the
/// error bookkeeping around it. A filter owns its parent stream and exposes it through
/// [`parent`](Filter::parent) so that engine level operations can walk the chain.
pub trait Filter: fmt::Debug {
    /// Appends more bytes to `core`'s buffer.
    ///
    /// Failures must be recorded with [`StreamCore::fail`] or [`StreamCore::propagate`] before
    /// being returned.
    fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus>;

    /// Repositions the stream to logical `offset`.
    ///
    /// The default serves the retained window directly, drops the buffer on seekable streams and
    /// reads forward on non-seekable ones.
    fn seek(&mut self, core: &mut StreamCore, offset: u64, mark: bool) -> io::Result<()> {
        let _ = mark;
        let window_start = core.v_offset - core.buffer.skip() as u64;

        if offset >= window_start && offset <= window_start + core.buffer.pos() as u64 {
            core.buffer.set_skip((offset - window_start) as usize);
            core.v_offset = offset;
            Ok(())
        } else if core.is_seekable() {
            core.buffer.clear();
            core.v_offset = offset;
            Ok(())
        } else if offset > core.v_offset {
            seek_forward(self, core, offset)
        } else {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("seek({}): stream is not seekable", core.name()),
            ))
        }
    }

    /// Metadata of the stream, see [`IStream::stat`].
    fn stat(&mut self, core: &mut StreamCore, exact: bool) -> io::Result<Metadata>;

    /// Drops cached state if the underlying resource changed, see [`IStream::sync`].
    fn sync(&mut self, core: &mut StreamCore) {
        let _ = core;
    }

    /// Releases resources held by the filter.
    fn close(&mut self, close_parent: bool) {
        if close_parent {
            if let Some(parent) = self.parent_mut() {
                parent.close(true);
            }
        }
    }

    /// The stream this filter reads from, root sources have none.
    fn parent(&self) -> Option<&IStream> {
        None
    }

    /// Mutable access to the stream this filter reads from.
    fn parent_mut(&mut self) -> Option<&mut IStream> {
        None
    }

    /// Gives up the parent, positioned consistently with this stream's logical offset.
    fn into_parent(self: Box<Self>, core: &mut StreamCore) -> Option<IStream> {
        let _ = core;
        None
    }
}

/// Reads and discards data until the logical offset reaches `target`.
///
/// Running into the end of the stream first isn't an error, the stream is just shorter than the
/// requested offset.
pub(crate) fn seek_forward<F: Filter + ?Sized>(
    filter: &mut F,
    core: &mut StreamCore,
    target: u64,
) -> io::Result<()> {
    loop {
        let available = core.buffer.available_len();
        if core.v_offset + available as u64 >= target {
            core.consume((target - core.v_offset) as usize);
            return Ok(());
        }
        core.consume(available);

        match filter.read(core)? {
            ReadStatus::NewData(_) => {}
            ReadStatus::EndOfStream => return Ok(()),
            ReadStatus::NoDataYet => return Err(io::ErrorKind::WouldBlock.into()),
            ReadStatus::BufferFull => {
                return Err(io::Error::other(format!(
                    "seek({}): buffer full at {}",
                    core.name(),
                    core.v_offset
                )))
            }
        }
    }
}

/// Data available at the current offset, see [`IStream::read_more`].
#[derive(Clone, Copy, Debug)]
pub enum More<'a> {
    /// The non-empty buffered data.
    Data(&'a [u8]),
    /// Nothing buffered and the stream has nothing yet.
    NoDataYet,
    /// Nothing buffered and the stream has ended.
    EndOfStream,
}

/// A buffered input stream, either a root source or a filter over a parent stream.
pub struct IStream {
    core: StreamCore,
    filter: Box<dyn Filter>,
}

impl fmt::Debug for IStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IStream")
            .field("name", &self.core.name)
            .field("offset", &self.core.v_offset)
            .field("filter", &self.filter)
            .finish()
    }
}

impl IStream {
    /// Creates a stream driving `filter`.
    pub fn new(filter: impl Filter + 'static, options: Options) -> Self {
        Self {
            core: StreamCore::new(options),
            filter: Box::new(filter),
        }
    }

    /// Replaces the name used in diagnostics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.core.name = name.into();
        self
    }

    /// Replaces the buffer cap, filters created afterwards on top of this stream inherit it.
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.core.max_buffer_size = max_buffer_size.max(1);
        self
    }

    /// Name used in diagnostics, usually the path of the underlying resource.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Logical offset of the first byte in [`data`](Self::data).
    pub fn offset(&self) -> u64 {
        self.core.v_offset
    }

    /// Returns `true` once the stream has ended and all buffered data was consumed.
    pub fn is_eof(&self) -> bool {
        self.core.eof && self.core.buffer.available_len() == 0
    }

    /// Whether reads wait for data instead of returning [`ReadStatus::NoDataYet`].
    pub fn is_blocking(&self) -> bool {
        self.core.blocking
    }

    /// Whether seeking backwards is supported.
    pub fn is_seekable(&self) -> bool {
        self.core.seekable
    }

    /// Size the buffer may grow to before reads report [`ReadStatus::BufferFull`].
    pub fn max_buffer_size(&self) -> usize {
        self.core.max_buffer_size
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.core.closed
    }

    /// The failure that made this stream unusable, if any.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.core.error.as_ref()
    }

    /// Bytes buffered at the current offset.
    pub fn data(&self) -> &[u8] {
        self.core.buffer.available()
    }

    /// Marks `amount` bytes of [`data`](Self::data) as used, advancing the offset.
    ///
    /// # Panics
    ///
    /// Panics if `amount` is larger than the buffered data.
    pub fn consume(&mut self, amount: usize) {
        self.core.consume(amount);
    }

    /// Skips `amount` bytes, seeking when they go beyond the buffered data.
    pub fn skip(&mut self, amount: u64) -> io::Result<()> {
        let available = self.core.buffer.available_len();
        if amount <= available as u64 {
            self.core.consume(amount as usize);
            Ok(())
        } else {
            let offset = self.core.v_offset.checked_add(amount).ok_or_else(invalid_seek)?;
            self.seek(offset, false)
        }
    }

    /// Pulls more data into the buffer.
    pub fn read(&mut self) -> io::Result<ReadStatus> {
        self.check_usable()?;

        let result = self.filter.read(&mut self.core);
        match &result {
            Ok(ReadStatus::EndOfStream) => self.core.eof = true,
            Ok(ReadStatus::NoDataYet) => {
                debug_assert!(!self.core.blocking, "blocking stream returned no data");
            }
            Ok(_) => {}
            Err(err) => {
                self.core.fail(StreamError::from(err));
            }
        }
        result
    }

    /// Returns the buffered data, reading only when nothing is buffered.
    pub fn read_more(&mut self) -> io::Result<More<'_>> {
        if self.core.buffer.available_len() == 0 {
            match self.read()? {
                ReadStatus::NewData(_) | ReadStatus::BufferFull => {}
                ReadStatus::NoDataYet => return Ok(More::NoDataYet),
                ReadStatus::EndOfStream => return Ok(More::EndOfStream),
            }
        }
        Ok(More::Data(self.core.buffer.available()))
    }

    /// Repositions the stream to logical `offset`.
    ///
    /// Setting `mark` tells the stream that the consumer may seek back to around this position
    /// later, so it should retain buffered data instead of discarding it eagerly. Seeking past
    /// the end isn't an error, the next read reports [`ReadStatus::EndOfStream`].
    pub fn seek(&mut self, offset: u64, mark: bool) -> io::Result<()> {
        self.check_usable()?;
        self.core.eof = false;

        let available = self.core.buffer.available_len() as u64;
        if !mark && offset >= self.core.v_offset && offset - self.core.v_offset <= available {
            self.core.consume((offset - self.core.v_offset) as usize);
            return Ok(());
        }
        self.filter.seek(&mut self.core, offset, mark)
    }

    /// Returns the stream's metadata.
    ///
    /// With `exact` unset the result may be an approximation (a filter may report the size of
    /// its underlying resource), but it stays the same for as long as the resource doesn't
    /// change. With `exact` set `size` is the stream's real length, even if finding it requires
    /// reading the whole stream.
    pub fn stat(&mut self, exact: bool) -> io::Result<Metadata> {
        if self.core.closed {
            return Err(closed_error());
        }
        self.filter.stat(&mut self.core, exact)
    }

    /// Lets the stream notice out-of-band changes to its underlying resource.
    ///
    /// Parents are synced before their children.
    pub fn sync(&mut self) {
        if self.core.closed {
            return;
        }
        if let Some(parent) = self.filter.parent_mut() {
            parent.sync();
        }
        self.filter.sync(&mut self.core);
    }

    /// Closes the stream, and with `close_parent` its whole parent chain.
    ///
    /// All later operations fail. Closing twice is harmless.
    pub fn close(&mut self, close_parent: bool) {
        if self.core.closed {
            return;
        }
        self.core.closed = true;
        self.core.buffer = WindowBuffer::new();
        self.filter.close(close_parent);
    }

    /// Acquires a reference to the parent stream this filter is wrapping.
    pub fn get_parent(&self) -> Option<&IStream> {
        self.filter.parent()
    }

    /// Acquires a mutable reference to the parent stream this filter is wrapping.
    ///
    /// Note that care must be taken to avoid tampering with the state of the parent which may
    /// otherwise confuse this filter.
    pub fn get_parent_mut(&mut self) -> Option<&mut IStream> {
        self.filter.parent_mut()
    }

    /// Consumes this filter returning the parent stream.
    ///
    /// Filters that map their offset directly onto the parent's leave it positioned at this
    /// stream's logical offset.
    pub fn into_parent(self) -> Option<IStream> {
        let Self { mut core, filter } = self;
        filter.into_parent(&mut core)
    }

    fn check_usable(&self) -> io::Result<()> {
        if self.core.closed {
            return Err(closed_error());
        }
        match &self.core.error {
            Some(error) => Err(error.to_io_error()),
            None => Ok(()),
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed")
}

fn invalid_seek() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "invalid seek to a negative or overflowing position",
    )
}

impl BufRead for IStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.core.buffer.available_len() == 0 {
            match IStream::read(self)? {
                ReadStatus::NewData(_) => {}
                ReadStatus::NoDataYet => return Err(io::ErrorKind::WouldBlock.into()),
                ReadStatus::EndOfStream | ReadStatus::BufferFull => break,
            }
        }
        Ok(self.data())
    }

    fn consume(&mut self, amount: usize) {
        IStream::consume(self, amount);
    }
}

impl Read for IStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let len = available.len().min(buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        IStream::consume(self, len);
        Ok(len)
    }
}

impl Seek for IStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let offset = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset().checked_add_signed(delta),
            SeekFrom::End(delta) => self.stat(true)?.size.checked_add_signed(delta),
        }
        .ok_or_else(invalid_seek)?;

        IStream::seek(self, offset, false)?;
        Ok(self.offset())
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, IStream, Metadata, Options, ReadStatus, StreamCore};
    use std::io::{self, Read, Seek, SeekFrom};

    /// Produces `0, 1, 2, ...` three bytes per read, up to `len`.
    #[derive(Debug)]
    struct Counter {
        len: u64,
    }

    impl Filter for Counter {
        fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus> {
            let high = core.high_offset();
            if high >= self.len {
                return Ok(ReadStatus::EndOfStream);
            }
            if !core.make_room(3, false) {
                return Ok(ReadStatus::BufferFull);
            }
            let bytes: Vec<u8> = (high..self.len.min(high + 3)).map(|b| b as u8).collect();
            Ok(ReadStatus::NewData(core.buffer_mut().fill_from(&bytes)))
        }

        fn stat(&mut self, _core: &mut StreamCore, _exact: bool) -> io::Result<Metadata> {
            Ok(Metadata {
                size: self.len,
                modified: None,
            })
        }
    }

    fn counter(len: u64, seekable: bool) -> IStream {
        IStream::new(
            Counter { len },
            Options {
                seekable,
                ..Options::default()
            },
        )
        .with_name("counter")
    }

    #[test]
    fn reads_until_eof() {
        let mut stream = counter(10, true);
        let mut output = vec![];
        stream.read_to_end(&mut output).unwrap();
        assert_eq!(output, (0..10).collect::<Vec<u8>>());
        assert!(stream.is_eof());
        assert_eq!(stream.read().unwrap(), ReadStatus::EndOfStream);
    }

    #[test]
    fn seek_within_window_and_past_it() {
        let mut stream = counter(20, true);
        assert_eq!(stream.read().unwrap(), ReadStatus::NewData(3));
        stream.consume(2);

        stream.seek(1, false).unwrap();
        assert_eq!(stream.data(), &[1, 2]);

        stream.seek(15, false).unwrap();
        assert!(stream.data().is_empty());
        stream.read().unwrap();
        assert_eq!(stream.data(), &[15, 16, 17]);
    }

    #[test]
    fn non_seekable_reads_forward() {
        let mut stream = counter(20, false);
        stream.seek(7, false).unwrap();
        assert_eq!(stream.offset(), 7);
        stream.read().unwrap();
        assert_eq!(stream.data()[0], 7);

        let err = stream.seek(0, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn buffer_full() {
        let mut stream = counter(100, true).with_max_buffer_size(4);
        assert_eq!(stream.read().unwrap(), ReadStatus::NewData(3));
        assert_eq!(stream.read().unwrap(), ReadStatus::NewData(1));
        assert_eq!(stream.read().unwrap(), ReadStatus::BufferFull);
        stream.consume(2);
        assert_eq!(stream.read().unwrap(), ReadStatus::NewData(2));
        assert_eq!(stream.data(), &[2, 3, 4, 5]);
    }

    #[test]
    fn io_seek_from_end() {
        let mut stream = counter(10, true);
        assert_eq!(Seek::seek(&mut stream, SeekFrom::End(-2)).unwrap(), 8);
        let mut output = vec![];
        stream.read_to_end(&mut output).unwrap();
        assert_eq!(output, [8, 9]);
        assert!(Seek::seek(&mut stream, SeekFrom::Current(-11)).is_err());
    }

    #[test]
    fn skip_overflow() {
        let mut stream = counter(10, true);
        stream.skip(4).unwrap();
        assert_eq!(stream.offset(), 4);

        let err = stream.skip(u64::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(stream.offset(), 4);
    }

    #[test]
    fn closed_stream_fails() {
        let mut stream = counter(10, true);
        stream.close(false);
        stream.close(false);
        assert_eq!(stream.read().unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert!(stream.stat(false).is_err());
    }
}
