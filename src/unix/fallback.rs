//! Fallback for Unix targets without a pty backend

use std::os::fd::OwnedFd;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub(super) fn open_device_pair() -> Result<(OwnedFd, OwnedFd, PathBuf)> {
    Err(Error::Unsupported)
}
