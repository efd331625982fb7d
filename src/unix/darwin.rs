//! macOS pty allocation
//!
//! Darwin's libc `ptsname` is not thread-safe, so the slave name is
//! fetched with the `TIOCPTYGNAME` ioctl instead, alongside the grant
//! and unlock ioctls the loader-level `grantpt`/`unlockpt` wrap.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::pty::posix_openpt;

use crate::error::Result;

const TIOCPTYGNAME: libc::c_ulong = 0x4080_7453; // _IOC(IOC_OUT, 't', 0x53, 128)
const TIOCPTYGRANT: libc::c_ulong = 0x2000_7454; // _IO('t', 0x54)
const TIOCPTYUNLK: libc::c_ulong = 0x2000_7452; // _IO('t', 0x52)

pub(super) fn open_device_pair() -> Result<(OwnedFd, OwnedFd, PathBuf)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)?;
    let raw = master.as_raw_fd();

    if unsafe { libc::ioctl(raw, TIOCPTYGRANT) } < 0 {
        return Err(Errno::last().into());
    }
    if unsafe { libc::ioctl(raw, TIOCPTYUNLK) } < 0 {
        return Err(Errno::last().into());
    }

    // The kernel fills at most 128 bytes including the terminator.
    let mut name = [0u8; 128];
    if unsafe { libc::ioctl(raw, TIOCPTYGNAME, name.as_mut_ptr()) } < 0 {
        return Err(Errno::last().into());
    }
    let cstr = CStr::from_bytes_until_nul(&name)
        .map_err(|_| crate::Error::Os(std::io::Error::other("unterminated pty name")))?;
    let path = PathBuf::from(std::str::from_utf8(cstr.to_bytes()).map_err(|_| {
        crate::Error::Os(std::io::Error::other("non-UTF-8 pty name"))
    })?);

    let slave = super::open_slave(&path)?;
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    Ok((master, slave, path))
}
