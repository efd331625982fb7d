//! NetBSD pty allocation via the /dev/ptm multiplexor
//!
//! A single `TIOCPTMGET` ioctl allocates a free pair, revokes the
//! slave, assigns ownership to the caller, and returns both open
//! descriptors together with the device names. The multiplexor fd is
//! only needed for the ioctl and is closed before returning.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};

use crate::error::Result;

// _IOR('t', 70, struct ptmget); the struct is 2056 bytes.
const TIOCPTMGET: libc::c_ulong = 0x4808_7446;

#[repr(C)]
struct Ptmget {
    cfd: libc::c_int,
    sfd: libc::c_int,
    cn: [libc::c_char; 1024],
    sn: [libc::c_char; 1024],
}

pub(super) fn open_device_pair() -> Result<(OwnedFd, OwnedFd, PathBuf)> {
    let ptm = super::open_slave(std::path::Path::new("/dev/ptm"))?;

    // The ioctl hands back plain descriptors; the fork lock keeps a
    // concurrent spawn from leaking them before close-on-exec is set.
    let guard = super::FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let mut pm: Ptmget = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(ptm.as_raw_fd(), TIOCPTMGET, &mut pm) } < 0 {
        return Err(Errno::last().into());
    }
    drop(ptm);

    let master = claim_cloexec(pm.cfd)?;
    let slave = claim_cloexec(pm.sfd)?;
    drop(guard);

    let bytes = unsafe { CStr::from_ptr(pm.sn.as_ptr()) }.to_bytes();
    let path = PathBuf::from(
        std::str::from_utf8(bytes)
            .map_err(|_| crate::Error::Os(std::io::Error::other("non-UTF-8 pty name")))?,
    );

    Ok((master, slave, path))
}

fn claim_cloexec(fd: RawFd) -> Result<OwnedFd> {
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    fcntl(owned.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(owned)
}
