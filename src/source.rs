//! Root streams, the bottom of every filter chain.

use crate::stream::{Filter, IStream, Metadata, Options, ReadStatus, StreamCore, StreamError};
use bytes::Bytes;
use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

/// How much free buffer space a root source tries to have before each read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Serves bytes held in memory.
#[derive(Debug)]
pub struct MemorySource {
    data: Bytes,
}

impl Filter for MemorySource {
    fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus> {
        let high = core.high_offset();
        if high >= self.data.len() as u64 {
            return Ok(ReadStatus::EndOfStream);
        }
        if !core.make_room(READ_CHUNK_SIZE, false) {
            return Ok(ReadStatus::BufferFull);
        }

        let amount = core.buffer_mut().fill_from(&self.data[high as usize..]);
        Ok(ReadStatus::NewData(amount))
    }

    fn stat(&mut self, _core: &mut StreamCore, _exact: bool) -> io::Result<Metadata> {
        Ok(Metadata {
            size: self.data.len() as u64,
            modified: None,
        })
    }
}

/// Reads a file through a [`File`] handle.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    file_pos: u64,
}

impl FileSource {
    fn error(core: &mut StreamCore, op: &str, err: &io::Error) -> io::Error {
        let error = StreamError::new(
            err.kind(),
            format!("{op}({}) failed: {err}", core.name()),
        );
        tracing::error!("{error}");
        core.fail(error)
    }
}

impl Filter for FileSource {
    fn read(&mut self, core: &mut StreamCore) -> io::Result<ReadStatus> {
        if !core.make_room(READ_CHUNK_SIZE, false) {
            return Ok(ReadStatus::BufferFull);
        }

        let high = core.high_offset();
        if self.file_pos != high {
            if let Err(err) = self.file.seek(SeekFrom::Start(high)) {
                return Err(Self::error(core, "seek", &err));
            }
            self.file_pos = high;
        }

        loop {
            match self.file.read(core.buffer_mut().unfilled_mut()) {
                Ok(0) => return Ok(ReadStatus::EndOfStream),
                Ok(amount) => {
                    core.buffer_mut().fill(amount);
                    self.file_pos += amount as u64;
                    return Ok(ReadStatus::NewData(amount));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::NoDataYet)
                }
                Err(err) => return Err(Self::error(core, "read", &err)),
            }
        }
    }

    fn stat(&mut self, core: &mut StreamCore, _exact: bool) -> io::Result<Metadata> {
        match self.file.metadata() {
            Ok(metadata) => Ok(Metadata {
                size: metadata.len(),
                modified: metadata.modified().ok(),
            }),
            Err(err) => Err(Self::error(core, "stat", &err)),
        }
    }

    fn sync(&mut self, core: &mut StreamCore) {
        // the file may have changed under us, re-read whatever is needed next
        core.buffer_mut().clear();
        core.eof = false;
    }
}

impl IStream {
    /// Creates a seekable stream over in-memory data.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        IStream::new(
            MemorySource { data: data.into() },
            Options {
                name: Some("(memory)".to_owned()),
                ..Options::default()
            },
        )
    }

    /// Creates a stream reading from an already opened file.
    pub fn from_file(file: File, name: impl Into<String>) -> Self {
        IStream::new(
            FileSource { file, file_pos: 0 },
            Options {
                name: Some(name.into()),
                ..Options::default()
            },
        )
    }

    /// Opens the file at `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::from_file(file, path.display().to_string()))
    }
}
