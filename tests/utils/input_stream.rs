use filter_istream::{
    stream::{Filter, StreamCore},
    IStream, Metadata, Options, ReadStatus, StreamError,
};
use proptest_derive::Arbitrary;
use std::{
    cell::RefCell,
    io,
    rc::Rc,
    time::{Duration, SystemTime},
};

#[derive(Arbitrary, Debug, Clone, Default)]
pub struct InputStream(Vec<Vec<u8>>);

impl InputStream {
    pub fn chunked(bytes: &[u8], chunk_size: usize) -> Self {
        InputStream(bytes.chunks(chunk_size).map(Vec::from).collect())
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// A blocking stream handing out one chunk per read.
    pub fn stream(&self) -> IStream {
        Script::new(self.clone()).stream()
    }

    /// Like [`stream`](Self::stream), with a [`ReadStatus::NoDataYet`] before every chunk.
    pub fn non_blocking_stream(&self) -> IStream {
        Script::new(self.clone()).non_blocking_stream()
    }
}

impl From<&[u8]> for InputStream {
    fn from(input: &[u8]) -> InputStream {
        InputStream(vec![Vec::from(input)])
    }
}

impl From<Vec<u8>> for InputStream {
    fn from(input: Vec<u8>) -> InputStream {
        InputStream(vec![input])
    }
}

impl From<Vec<Vec<u8>>> for InputStream {
    fn from(input: Vec<Vec<u8>>) -> InputStream {
        InputStream(input)
    }
}

/// How a scripted source behaves once its data is exhausted.
#[derive(Clone, Copy, Debug, Default)]
pub enum End {
    #[default]
    Eof,
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
struct State {
    data: Vec<u8>,
    /// Offsets where each chunk ends.
    boundaries: Vec<usize>,
    end: End,
    version: u64,
    reads: usize,
}

impl State {
    fn set_input(&mut self, input: InputStream) {
        self.data.clear();
        self.boundaries.clear();
        for chunk in input.0 {
            self.data.extend_from_slice(&chunk);
            self.boundaries.push(self.data.len());
        }
    }

    fn chunk_end(&self, offset: usize) -> Option<usize> {
        self.boundaries.iter().copied().find(|&end| end > offset)
    }
}

/// Handle to a scripted root source, which stays usable to inspect and change it after the
/// stream was built.
#[derive(Clone, Debug)]
pub struct Script(Rc<RefCell<State>>);

impl Script {
    pub fn new(input: impl Into<InputStream>) -> Self {
        let mut state = State::default();
        state.set_input(input.into());
        Script(Rc::new(RefCell::new(state)))
    }

    pub fn end_with(self, end: End) -> Self {
        self.0.borrow_mut().end = end;
        self
    }

    /// Swaps the contents, which also changes the reported modification time.
    pub fn replace(&self, input: impl Into<InputStream>) {
        let mut state = self.0.borrow_mut();
        state.set_input(input.into());
        state.version += 1;
    }

    /// Number of reads that delivered data.
    pub fn reads(&self) -> usize {
        self.0.borrow().reads
    }

    pub fn stream(&self) -> IStream {
        self.build(true, true)
    }

    pub fn non_blocking_stream(&self) -> IStream {
        self.build(false, true)
    }

    pub fn non_seekable_stream(&self) -> IStream {
        self.build(true, false)
    }

    fn build(&self, blocking: bool, seekable: bool) -> IStream {
        IStream::new(
            ScriptSource {
                script: self.clone(),
                pending: false,
            },
            Options {
                blocking,
                seekable,
                name: Some("script".to_owned()),
                ..Options::default()
            },
        )
    }
}

#[derive(Debug)]
struct ScriptSource {
    script: Script,
    pending: bool,
}

impl Filter for ScriptSource {
    fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus> {
        if !core.is_blocking() {
            self.pending = !self.pending;
            if self.pending {
                return Ok(ReadStatus::NoDataYet);
            }
        }

        let mut state = self.script.0.borrow_mut();
        let high = core.high_offset() as usize;
        let Some(end) = state.chunk_end(high) else {
            return match state.end {
                End::Eof => Ok(ReadStatus::EndOfStream),
                End::Fail(kind) => Err(core.fail(StreamError::new(kind, "scripted failure"))),
            };
        };

        if !core.make_room(end - high, false) {
            return Ok(ReadStatus::BufferFull);
        }
        let amount = core.buffer_mut().fill_from(&state.data[high..end]);
        state.reads += 1;
        Ok(ReadStatus::NewData(amount))
    }

    fn stat(&mut self, _core: &mut StreamCore, _exact: bool) -> io::Result<Metadata> {
        let state = self.script.0.borrow();
        Ok(Metadata {
            size: state.data.len() as u64,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(state.version)),
        })
    }

    fn sync(&mut self, core: &mut StreamCore) {
        core.buffer_mut().clear();
    }
}
