//! Unix pty/tty handles
//!
//! One master/slave device pair per [`open`](crate::open) call. Each
//! handle owns its file descriptor plus an internal wake pipe so that
//! closing the handle from another thread interrupts a blocked read
//! promptly instead of hanging until the peer writes.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd;

use crate::error::{Error, Result};
use crate::winsize::{get_winsize, set_winsize, Winsize};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as sys;

#[cfg(target_os = "macos")]
mod darwin;
#[cfg(target_os = "macos")]
use darwin as sys;

#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
mod bsd;
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
use bsd as sys;

#[cfg(target_os = "netbsd")]
mod netbsd;
#[cfg(target_os = "netbsd")]
use netbsd as sys;

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
mod solaris;
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
use solaris as sys;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "solaris",
    target_os = "illumos"
)))]
mod fallback;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "solaris",
    target_os = "illumos"
)))]
use fallback as sys;

/// Sentinel stored in the timeout cell when no deadline is set.
const NO_TIMEOUT: u64 = u64::MAX;

/// Serializes fork against descriptor creation that cannot set
/// close-on-exec atomically, so a child never inherits a descriptor
/// caught mid-setup.
pub(crate) static FORK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(not(target_os = "macos"))]
fn wake_pipe() -> Result<(OwnedFd, OwnedFd)> {
    Ok(unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?)
}

// Darwin has no pipe2, so the flags are applied after the fact; the
// fork lock keeps a concurrent spawn from leaking the window.
#[cfg(target_os = "macos")]
fn wake_pipe() -> Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let (r, w) = unistd::pipe()?;
    for end in [&r, &w] {
        fcntl(end.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        fcntl(end.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    }
    Ok((r, w))
}

struct HandleInner {
    fd: OwnedFd,
    wake_r: OwnedFd,
    wake_w: OwnedFd,
    closed: AtomicBool,
    /// Read timeout in milliseconds; `NO_TIMEOUT` means block forever.
    read_timeout_ms: AtomicU64,
}

/// Shared fd handle with interruptible, deadline-aware reads.
#[derive(Clone)]
struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    fn new(fd: OwnedFd) -> Result<Self> {
        // The wake pipe must never block close() and must not leak into
        // spawned children.
        let (wake_r, wake_w) = wake_pipe()?;
        Ok(Handle {
            inner: Arc::new(HandleInner {
                fd,
                wake_r,
                wake_w,
                closed: AtomicBool::new(false),
                read_timeout_ms: AtomicU64::new(NO_TIMEOUT),
            }),
        })
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        let ms = match timeout {
            Some(d) => (d.as_millis() as u64).min(NO_TIMEOUT - 1),
            None => NO_TIMEOUT,
        };
        self.inner.read_timeout_ms.store(ms, Ordering::Relaxed);
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            log::debug!("closing pty handle fd {}", self.inner.fd.as_raw_fd());
            let _ = unistd::write(self.inner.wake_w.as_fd(), &[1u8]);
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let deadline = match self.inner.read_timeout_ms.load(Ordering::Relaxed) {
            NO_TIMEOUT => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        };

        loop {
            if self.is_closed() {
                return Err(Error::Closed);
            }

            let timeout = match deadline {
                None => PollTimeout::NONE,
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::Timeout);
                    }
                    let ms = (d - now).as_millis().min(i32::MAX as u128) as i32;
                    PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
                }
            };

            let mut fds = [
                PollFd::new(self.inner.fd.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.inner.wake_r.as_fd(), PollFlags::POLLIN),
            ];
            let n = match poll(&mut fds, timeout) {
                Err(Errno::EINTR) => continue,
                other => other?,
            };
            if n == 0 {
                return Err(Error::Timeout);
            }
            if fds[1].revents().is_some_and(|r| !r.is_empty()) {
                return Err(Error::Closed);
            }
            let ready = fds[0].revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            });
            if !ready {
                continue;
            }
            match unistd::read(self.inner.fd.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                // Spurious wakeup; the kernel may have consumed the
                // readiness between poll and read.
                Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(unistd::write(self.inner.fd.as_fd(), buf)?)
    }

    fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.fd.as_fd()
    }

    fn as_raw_fd(&self) -> RawFd {
        self.inner.fd.as_raw_fd()
    }
}

/// The master side of a pseudo-terminal pair.
pub struct Pty {
    handle: Handle,
}

/// The slave side of a pseudo-terminal pair, presented to a child
/// process as if it were a physical terminal.
pub struct Tty {
    handle: Handle,
    path: PathBuf,
}

impl Pty {
    /// Read bytes written to the slave side (and line-discipline echo).
    ///
    /// Blocks according to the kernel tty driver unless a read timeout
    /// is set; returns [`Error::Closed`] if the handle is closed, also
    /// while the read is blocked.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.handle.read(buf)
    }

    /// Write bytes into the terminal's input queue.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.handle.write(buf)
    }

    pub fn write_all(&self, buf: &[u8]) -> Result<()> {
        self.handle.write_all(buf)
    }

    /// Bound every subsequent read by `timeout`; `None` blocks forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.handle.set_read_timeout(timeout)
    }

    /// Mark the handle closed and interrupt any blocked read on it.
    ///
    /// The underlying descriptor is released once the last clone is
    /// dropped.
    pub fn close(&self) {
        self.handle.close()
    }

    /// A second handle to the same master descriptor, so one thread can
    /// read while another closes.
    pub fn try_clone(&self) -> Result<Pty> {
        Ok(Pty {
            handle: self.handle.clone(),
        })
    }

    pub fn window_size(&self) -> Result<Winsize> {
        get_winsize(self)
    }

    pub fn set_window_size(&self, size: Winsize) -> Result<()> {
        set_winsize(self, size)
    }
}

impl Tty {
    /// Path of the slave device (e.g. `/dev/pts/3`), usable to open the
    /// same terminal by name.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.handle.read(buf)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.handle.write(buf)
    }

    pub fn write_all(&self, buf: &[u8]) -> Result<()> {
        self.handle.write_all(buf)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.handle.set_read_timeout(timeout)
    }

    pub fn close(&self) {
        self.handle.close()
    }

    pub fn try_clone(&self) -> Result<Tty> {
        Ok(Tty {
            handle: self.handle.clone(),
            path: self.path.clone(),
        })
    }

    pub fn window_size(&self) -> Result<Winsize> {
        get_winsize(self)
    }

    pub fn set_window_size(&self, size: Winsize) -> Result<()> {
        set_winsize(self, size)
    }
}

impl AsFd for Pty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }
}

impl AsRawFd for Pty {
    fn as_raw_fd(&self) -> RawFd {
        self.handle.as_raw_fd()
    }
}

impl AsFd for Tty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }
}

impl AsRawFd for Tty {
    fn as_raw_fd(&self) -> RawFd {
        self.handle.as_raw_fd()
    }
}

impl io::Read for Pty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Pty::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for Pty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Pty::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Tty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Tty::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for Tty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Tty::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Allocate one master/slave device pair via the platform routine.
pub(crate) fn open_pair() -> Result<(Pty, Tty)> {
    let (master, slave, path) = sys::open_device_pair()?;
    log::debug!(
        "opened pty pair: master fd {}, slave fd {} ({})",
        master.as_raw_fd(),
        slave.as_raw_fd(),
        path.display()
    );
    let pty = Pty {
        handle: Handle::new(master)?,
    };
    let tty = Tty {
        handle: Handle::new(slave)?,
        path,
    };
    Ok((pty, tty))
}

/// Open a slave device read-write by path, close-on-exec, without
/// making it the controlling terminal of the calling process.
pub(crate) fn open_slave(path: &Path) -> Result<OwnedFd> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| Error::Os(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(Errno::last().into());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open;
    use std::time::Duration;

    const IO_TIMEOUT: Duration = Duration::from_secs(2);

    fn open_with_timeouts() -> (Pty, Tty) {
        let (pty, tty) = open().expect("open pair");
        pty.set_read_timeout(Some(IO_TIMEOUT));
        tty.set_read_timeout(Some(IO_TIMEOUT));
        (pty, tty)
    }

    fn read_exact(label: &str, read: impl Fn(&mut [u8]) -> Result<usize>, buf: &mut [u8]) {
        let mut filled = 0;
        while filled < buf.len() {
            let n = read(&mut buf[filled..])
                .unwrap_or_else(|e| panic!("{label}: read failed: {e}"));
            assert_ne!(n, 0, "{label}: unexpected EOF");
            filled += n;
        }
    }

    #[test]
    fn open_returns_usable_pair() {
        let (pty, tty) = open().expect("open pair");
        assert!(pty.as_raw_fd() >= 0);
        assert!(tty.as_raw_fd() >= 0);
        assert!(!tty.path().as_os_str().is_empty());
    }

    #[test]
    fn pair_descriptors_are_close_on_exec() {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};

        let (pty, tty) = open().expect("open pair");
        for fd in [pty.as_raw_fd(), tty.as_raw_fd()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).expect("F_GETFD"));
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn slave_path_is_under_dev_pts() {
        let (_pty, tty) = open().expect("open pair");
        assert!(tty.path().starts_with("/dev/pts"));
    }

    #[test]
    fn slave_path_can_be_reopened() {
        use std::io::Write;

        let (pty, tty) = open_with_timeouts();

        let mut by_name = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tty.path())
            .expect("open slave by path");
        by_name.write_all(b"ping").expect("write via reopened slave");

        let mut buf = [0u8; 4];
        read_exact("pty", |b| pty.read(b), &mut buf);
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn sizes_agree_between_master_and_slave() {
        let (pty, tty) = open_with_timeouts();

        let from_pty = pty.window_size().expect("get from pty");
        let from_tty = tty.window_size().expect("get from tty");
        assert_eq!(from_pty, from_tty);

        // Mutate every field and check the other side observes it.
        let next = Winsize::with_pixels(
            from_pty.cols + 1,
            from_pty.rows + 1,
            from_pty.pixel_width + 1,
            from_pty.pixel_height + 1,
        );
        tty.set_window_size(next).expect("set on tty");
        assert_eq!(pty.window_size().expect("get from pty"), next);
        assert_eq!(tty.window_size().expect("get from tty"), next);
    }

    #[test]
    fn resize_is_idempotent() {
        let (pty, _tty) = open_with_timeouts();

        pty.set_window_size(Winsize::new(100, 30)).expect("set");
        let current = pty.window_size().expect("get");
        pty.set_window_size(current).expect("set same");
        assert_eq!(pty.window_size().expect("get again"), current);
    }

    #[test]
    fn slave_to_master_is_raw_passthrough() {
        let (pty, tty) = open_with_timeouts();

        tty.write_all(b"ping").expect("write to slave");
        let mut buf = [0u8; 4];
        read_exact("pty", |b| pty.read(b), &mut buf);
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn master_to_slave_translates_and_echoes() {
        let (pty, tty) = open_with_timeouts();

        pty.write_all(b"pong\n").expect("write to master");

        // The slave sees the literal line.
        let mut line = [0u8; 5];
        read_exact("tty", |b| tty.read(b), &mut line);
        assert_eq!(&line, b"pong\n");

        // The echo comes back with NL -> CRLF translation.
        let mut echo = [0u8; 6];
        read_exact("pty", |b| pty.read(b), &mut echo);
        assert_eq!(&echo, b"pong\r\n");
    }

    #[test]
    fn control_characters_pass_through_and_echo_visually() {
        let (pty, tty) = open_with_timeouts();

        pty.write_all(b"pind").expect("write");
        pty.write_all(b"\x08").expect("write backspace");
        pty.write_all(b"g\n").expect("write");

        // The slave reads the bytes exactly as submitted; backspace is
        // not the erase character, so the driver does not edit the line.
        let mut line = [0u8; 7];
        read_exact("tty", |b| tty.read(b), &mut line);
        assert_eq!(&line, b"pind\x08g\n");

        // The echo renders the control byte as ^H.
        let mut echo = [0u8; 9];
        read_exact("pty", |b| pty.read(b), &mut echo);
        assert_eq!(&echo, b"pind^Hg\r\n");
    }

    #[test]
    fn pairs_are_independent() {
        let (pty_a, tty_a) = open_with_timeouts();
        let (pty_b, tty_b) = open_with_timeouts();

        tty_a.write_all(b"aaaa").expect("write pair A");
        tty_b.write_all(b"bbbb").expect("write pair B");

        let mut buf = [0u8; 4];
        read_exact("pty A", |b| pty_a.read(b), &mut buf);
        assert_eq!(&buf, b"aaaa");
        read_exact("pty B", |b| pty_b.read(b), &mut buf);
        assert_eq!(&buf, b"bbbb");

        let before_b = pty_b.window_size().expect("get B");
        pty_a
            .set_window_size(Winsize::new(before_b.cols + 7, before_b.rows + 3))
            .expect("resize A");
        assert_eq!(pty_b.window_size().expect("get B again"), before_b);
    }

    #[test]
    fn operations_on_closed_handle_fail() {
        let (pty, _tty) = open().expect("open pair");
        pty.close();

        let mut buf = [0u8; 1];
        assert!(matches!(pty.read(&mut buf), Err(Error::Closed)));
        assert!(matches!(pty.write(b"x"), Err(Error::Closed)));
    }
}
