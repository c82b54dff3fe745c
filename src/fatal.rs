//! Termination for conditions a stream can't recover from.
//!
//! These are not data problems: they mean the codec library is unusable in this process or the
//! calling code drove it incorrectly, so continuing could only make things worse.

/// Exit status used when terminating the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalStatus {
    /// A codec couldn't allocate memory.
    OutOfMemory,
    /// Any other unrecoverable condition.
    Default,
}

impl FatalStatus {
    /// The process exit status.
    pub fn code(self) -> i32 {
        match self {
            Self::OutOfMemory => 83,
            Self::Default => 89,
        }
    }
}

/// Logs `message` and exits the process with `status`.
#[cold]
pub fn fatal(status: FatalStatus, message: &str) -> ! {
    tracing::error!(status = status.code(), "Fatal: {message}");
    std::process::exit(status.code())
}

#[cfg(test)]
mod tests {
    use super::FatalStatus;

    #[test]
    fn statuses_are_distinct() {
        assert_ne!(FatalStatus::OutOfMemory.code(), FatalStatus::Default.code());
        assert_ne!(FatalStatus::Default.code(), 0);
    }
}
