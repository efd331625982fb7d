//! Solaris/illumos pty allocation over STREAMS
//!
//! The /dev/ptmx clone device is driven with `I_STR` stream ioctls:
//! `ISPTM` verifies the fd is a pty master, `OWNERPT` takes ownership
//! of the slave, `UNLKPT` unlocks it. The slave name is derived from
//! the minor number of the master device, and the slave needs the
//! `ptem` and `ldterm` modules pushed before it behaves as a terminal.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::fstat;

use crate::error::Result;

const I_STR: libc::c_int = (b'S' as libc::c_int) << 8 | 0o10;
const I_PUSH: libc::c_int = (b'S' as libc::c_int) << 8 | 0o2;
const ISPTM: libc::c_int = (b'P' as libc::c_int) << 8 | 1;
const UNLKPT: libc::c_int = (b'P' as libc::c_int) << 8 | 2;
const OWNERPT: libc::c_int = (b'P' as libc::c_int) << 8 | 5;

#[repr(C)]
struct Strioctl {
    ic_cmd: libc::c_int,
    ic_timout: libc::c_int,
    ic_len: libc::c_int,
    ic_dp: *mut libc::c_void,
}

#[repr(C)]
struct PtOwn {
    pto_ruid: libc::uid_t,
    pto_rgid: libc::gid_t,
}

fn stream_ioctl(fd: libc::c_int, istr: &mut Strioctl) -> Result<()> {
    if unsafe { libc::ioctl(fd, I_STR, istr as *mut Strioctl) } < 0 {
        return Err(Errno::last().into());
    }
    Ok(())
}

pub(super) fn open_device_pair() -> Result<(OwnedFd, OwnedFd, PathBuf)> {
    let master = super::open_slave(Path::new("/dev/ptmx"))?;
    let raw = master.as_raw_fd();

    let mut istr = Strioctl {
        ic_cmd: ISPTM,
        ic_timout: 0,
        ic_len: 0,
        ic_dp: std::ptr::null_mut(),
    };
    stream_ioctl(raw, &mut istr)?;

    let st = fstat(raw)?;
    let path = PathBuf::from(format!("/dev/pts/{}", st.st_rdev & 0o377));

    let mut own = PtOwn {
        pto_ruid: unsafe { libc::getuid() },
        pto_rgid: unsafe { libc::getgid() },
    };
    let mut istr = Strioctl {
        ic_cmd: OWNERPT,
        ic_timout: 0,
        ic_len: std::mem::size_of::<PtOwn>() as libc::c_int,
        ic_dp: (&mut own as *mut PtOwn).cast(),
    };
    stream_ioctl(raw, &mut istr)?;

    let mut istr = Strioctl {
        ic_cmd: UNLKPT,
        ic_timout: 0,
        ic_len: 0,
        ic_dp: std::ptr::null_mut(),
    };
    stream_ioctl(raw, &mut istr)?;

    let slave = super::open_slave(&path)?;
    for module in [c"ptem", c"ldterm"] {
        if unsafe { libc::ioctl(slave.as_raw_fd(), I_PUSH, module.as_ptr()) } < 0 {
            return Err(Errno::last().into());
        }
    }

    Ok((master, slave, path))
}
