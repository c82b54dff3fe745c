use std::{fmt, io};

/// The last failure recorded on a stream.
///
/// Unlike [`io::Error`] this can be cloned, which lets a filter copy its parent's failure verbatim
/// and lets every later operation on a failed stream report the same cause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamError {
    kind: io::ErrorKind,
    message: String,
}

impl StreamError {
    /// Creates an error of `kind` with a diagnostic message.
    pub fn new(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classification of the failure.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// Human readable diagnostic.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An [`io::Error`] carrying the same kind and message.
    pub fn to_io_error(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StreamError {}

impl From<&io::Error> for StreamError {
    fn from(err: &io::Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        io::Error::new(err.kind, err.message)
    }
}
