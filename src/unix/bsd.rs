//! FreeBSD and DragonFly pty allocation
//!
//! Both systems name the slave of a posix_openpt master through the
//! `FIODGNAME` ioctl, which fills a caller-supplied buffer with the
//! device name relative to /dev.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::pty::posix_openpt;

use crate::error::Result;

#[repr(C)]
struct FiodgnameArg {
    len: libc::c_int,
    buf: *mut libc::c_char,
}

// _IOW('f', 120, struct fiodgname_arg); the struct carries a pointer,
// so the size-encoding field differs between 32- and 64-bit ABIs.
const IOC_IN: libc::c_ulong = 0x8000_0000;
const FIODGNAME: libc::c_ulong = IOC_IN
    | ((std::mem::size_of::<FiodgnameArg>() as libc::c_ulong & 0x1fff) << 16)
    | ((b'f' as libc::c_ulong) << 8)
    | 120;

pub(super) fn open_device_pair() -> Result<(OwnedFd, OwnedFd, PathBuf)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)?;

    let mut name = [0u8; 128];
    let mut arg = FiodgnameArg {
        len: name.len() as libc::c_int,
        buf: name.as_mut_ptr().cast(),
    };
    if unsafe { libc::ioctl(master.as_raw_fd(), FIODGNAME, &mut arg) } < 0 {
        return Err(Errno::last().into());
    }
    let cstr = CStr::from_bytes_until_nul(&name)
        .map_err(|_| crate::Error::Os(std::io::Error::other("unterminated pty name")))?;
    let path = PathBuf::from(format!(
        "/dev/{}",
        std::str::from_utf8(cstr.to_bytes())
            .map_err(|_| crate::Error::Os(std::io::Error::other("non-UTF-8 pty name")))?
    ));

    let slave = super::open_slave(&path)?;
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    Ok((master, slave, path))
}
