//! Error types for PTY operations

use std::io;
use thiserror::Error;

/// PTY error type
#[derive(Debug, Error)]
pub enum Error {
    /// The current platform has no PTY implementation.
    #[error("pseudo-terminals are not supported on this platform")]
    Unsupported,

    /// A handle that does not refer to a terminal device was passed
    /// where one is required.
    #[error("handle does not refer to a terminal")]
    NotATerminal,

    /// A read exceeded its configured deadline.
    #[error("read deadline expired")]
    Timeout,

    /// The handle was closed, either before the operation or while a
    /// read was blocked on it.
    #[error("handle has been closed")]
    Closed,

    /// A required kernel32 entry point could not be resolved. ConPTY is
    /// only available on Windows 10 1809 and later.
    #[cfg(windows)]
    #[error("kernel32 entry point unavailable: {0}")]
    MissingApi(&'static str),

    /// An underlying syscall or OS API failed; the native error code is
    /// preserved.
    #[error(transparent)]
    Os(#[from] io::Error),
}

/// Result type for PTY operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(unix)]
impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        if errno == nix::errno::Errno::ENOTTY {
            Error::NotATerminal
        } else {
            Error::Os(io::Error::from_raw_os_error(errno as i32))
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Os(io) => io,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, "read deadline expired"),
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, "handle has been closed"),
            Error::Unsupported => io::Error::new(io::ErrorKind::Unsupported, err.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}
