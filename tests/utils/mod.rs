#![allow(unused)] // Different tests use a different subset of functions

mod input_stream;

pub use self::input_stream::{End, InputStream, Script};

use filter_istream::{IStream, ReadStatus};
use std::io::{self, Read};

/// Reads `stream` to its end, retrying whenever it has no data yet.
///
/// Everything read before a failure is returned along with it.
pub fn read_all(stream: &mut IStream) -> (Vec<u8>, io::Result<()>) {
    let mut output = vec![];
    loop {
        take_data(stream, &mut output, usize::MAX);
        match stream.read() {
            Ok(ReadStatus::NewData(_)) | Ok(ReadStatus::NoDataYet) => {}
            Ok(ReadStatus::EndOfStream) => return (output, Ok(())),
            Ok(ReadStatus::BufferFull) => panic!("buffer full with nothing buffered"),
            Err(err) => return (output, Err(err)),
        }
    }
}

/// Reads and consumes exactly `len` bytes, retrying whenever the stream has no data yet.
pub fn read_len(stream: &mut IStream, len: usize) -> Vec<u8> {
    let mut output = vec![];
    loop {
        let limit = len - output.len();
        take_data(stream, &mut output, limit);
        if output.len() == len {
            return output;
        }
        match stream.read().unwrap() {
            ReadStatus::NewData(_) | ReadStatus::NoDataYet => {}
            status => panic!("stream stopped with {status:?} after {} bytes", output.len()),
        }
    }
}

fn take_data(stream: &mut IStream, output: &mut Vec<u8>, limit: usize) {
    let data = stream.data();
    let len = data.len().min(limit);
    output.extend_from_slice(&data[..len]);
    stream.consume(len);
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random()).collect()
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .without_time()
        .with_ansi(false)
        .with_test_writer()
        .try_init();
}

#[cfg(feature = "bzip2")]
pub fn bz2_compress(bytes: &[u8]) -> Vec<u8> {
    use bzip2::{read::BzEncoder, Compression};
    let mut output = vec![];
    BzEncoder::new(bytes, Compression::fast())
        .read_to_end(&mut output)
        .unwrap();
    output
}
