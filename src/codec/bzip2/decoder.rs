use crate::{
    codec::{Decode, DecodeError, DecodeStatus},
    util::PartialBuffer,
};
use bzip2::{Decompress, Error, Status};
use std::fmt;

/// bzip2 decoder backed by libbz2.
///
/// Multiple concatenated streams are not supported, decoding stops at the end of the first one.
pub struct BzDecoder {
    decompress: Decompress,
}

impl fmt::Debug for BzDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BzDecoder {{total_in: {}, total_out: {}}}",
            self.decompress.total_in(),
            self.decompress.total_out()
        )
    }
}

impl Default for BzDecoder {
    fn default() -> Self {
        Self {
            decompress: Decompress::new(false),
        }
    }
}

impl BzDecoder {
    /// Creates a decoder expecting the start of a bzip2 stream.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decode for BzDecoder {
    fn name(&self) -> &'static str {
        "bzlib"
    }

    fn reinit(&mut self) {
        // panics if libbz2 can't allocate its state
        self.decompress = Decompress::new(false);
    }

    fn decode(
        &mut self,
        input: &mut PartialBuffer<&[u8]>,
        output: &mut PartialBuffer<&mut [u8]>,
    ) -> Result<DecodeStatus, DecodeError> {
        let prior_in = self.decompress.total_in();
        let prior_out = self.decompress.total_out();

        let result = self
            .decompress
            .decompress(input.unwritten(), output.unwritten_mut());

        // libbz2 may have made progress even when it reports an error.
        input.advance((self.decompress.total_in() - prior_in) as usize);
        output.advance((self.decompress.total_out() - prior_out) as usize);

        match result {
            // Decompression went fine, nothing much to report.
            Ok(Status::Ok) => Ok(DecodeStatus::Progress),

            // The stream's end has been met, meaning that no more data can be input.
            Ok(Status::StreamEnd) => Ok(DecodeStatus::StreamEnd),

            // libbz2 couldn't allocate the block it needs to decode the stream.
            Ok(Status::MemNeeded) => Err(DecodeError::OutOfMemory),

            // These are only ever returned by the compressor.
            Ok(Status::FlushOk | Status::RunOk | Status::FinishOk) => unreachable!(),

            Err(Error::Data) => Err(DecodeError::Corrupt),
            Err(Error::DataMagic) => Err(DecodeError::BadHeader(
                "wrong magic in header (not bz2 file?)",
            )),
            Err(err) => Err(DecodeError::InvalidArguments(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BzDecoder;
    use crate::{
        codec::{Decode, DecodeError, DecodeStatus},
        util::PartialBuffer,
    };
    use std::io::Read;

    fn compress(bytes: &[u8]) -> Vec<u8> {
        let mut output = vec![];
        bzip2::read::BzEncoder::new(bytes, bzip2::Compression::fast())
            .read_to_end(&mut output)
            .unwrap();
        output
    }

    #[test]
    fn decodes_whole_stream() {
        let compressed = compress(b"hello world");
        let mut decoder = BzDecoder::new();
        let mut output = [0; 64];
        let mut input = PartialBuffer::new(&compressed[..]);
        let mut out = PartialBuffer::new(&mut output[..]);

        let status = decoder.decode(&mut input, &mut out).unwrap();
        assert_eq!(status, DecodeStatus::StreamEnd);
        assert_eq!(out.written(), b"hello world");
        assert!(input.unwritten().is_empty());
    }

    #[test]
    fn bad_magic() {
        let mut decoder = BzDecoder::new();
        let mut output = [0; 64];
        let err = decoder
            .decode(
                &mut PartialBuffer::new(&b"not a bzip2 stream at all"[..]),
                &mut PartialBuffer::new(&mut output[..]),
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::BadHeader(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn reinit_starts_over() {
        let compressed = compress(b"again and again");
        let mut decoder = BzDecoder::new();
        let mut output = [0; 64];

        let half = compressed.len() / 2;
        decoder
            .decode(
                &mut PartialBuffer::new(&compressed[..half]),
                &mut PartialBuffer::new(&mut output[..]),
            )
            .unwrap();

        decoder.reinit();
        let mut out = PartialBuffer::new(&mut output[..]);
        let status = decoder
            .decode(&mut PartialBuffer::new(&compressed[..]), &mut out)
            .unwrap();
        assert_eq!(status, DecodeStatus::StreamEnd);
        assert_eq!(out.written(), b"again and again");
    }
}
