//! Stubs for platforms without a pty implementation
//!
//! The method set mirrors the real implementations so caller code
//! compiles unchanged; every fallible operation reports `Unsupported`.

use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::winsize::Winsize;

/// The master side of a pseudo-terminal pair. Never constructed on this
/// platform.
pub struct Pty {
    _private: (),
}

/// The slave side of a pseudo-terminal pair. Never constructed on this
/// platform.
pub struct Tty {
    _private: (),
}

impl Pty {
    pub fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    pub fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    pub fn write_all(&self, _buf: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn set_read_timeout(&self, _timeout: Option<Duration>) {}

    pub fn try_clone(&self) -> Result<Pty> {
        Err(Error::Unsupported)
    }

    pub fn window_size(&self) -> Result<Winsize> {
        Err(Error::Unsupported)
    }

    pub fn set_window_size(&self, _size: Winsize) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn close(&self) {}
}

impl Tty {
    pub fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    pub fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    pub fn write_all(&self, _buf: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn set_read_timeout(&self, _timeout: Option<Duration>) {}

    pub fn try_clone(&self) -> Result<Tty> {
        Err(Error::Unsupported)
    }

    pub fn path(&self) -> &Path {
        Path::new("")
    }

    pub fn window_size(&self) -> Result<Winsize> {
        Err(Error::Unsupported)
    }

    pub fn set_window_size(&self, _size: Winsize) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn close(&self) {}
}

pub(crate) fn open_pair() -> Result<(Pty, Tty)> {
    Err(Error::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reports_unsupported() {
        assert!(matches!(open_pair(), Err(Error::Unsupported)));
    }
}
