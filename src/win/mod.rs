//! Windows pty/tty handles over ConPTY
//!
//! A pair is two anonymous pipes bridged by a pseudo console: the
//! caller reads and writes the outer ends through [`Pty`], while the
//! console owns duplicates of the inner ends and renders the attached
//! process's VT output into them. [`Tty`] keeps the inner ends alive
//! and carries the console handle a spawned process attaches to; there
//! is no device path on this platform.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use windows::Win32::Foundation::{CloseHandle, ERROR_BROKEN_PIPE, HANDLE};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{GetConsoleScreenBufferInfo, CONSOLE_SCREEN_BUFFER_INFO};
use windows::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};
use windows::Win32::System::IO::CancelIoEx;

use crate::error::{Error, Result};
use crate::winsize::Winsize;

pub(crate) mod conpty;
pub(crate) mod run;

use conpty::PseudoConsole;

const NO_TIMEOUT: u64 = u64::MAX;

/// How often a read polls the pipe while waiting for data.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct HandleInner {
    read: HANDLE,
    write: HANDLE,
    closed: AtomicBool,
    read_timeout_ms: AtomicU64,
}

// Pipe handles are used from multiple threads only through the atomic
// closed flag protocol below.
unsafe impl Send for HandleInner {}
unsafe impl Sync for HandleInner {}

impl Drop for HandleInner {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.read);
            let _ = CloseHandle(self.write);
        }
    }
}

#[derive(Clone)]
struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    fn new(read: HANDLE, write: HANDLE) -> Self {
        Handle {
            inner: Arc::new(HandleInner {
                read,
                write,
                closed: AtomicBool::new(false),
                read_timeout_ms: AtomicU64::new(NO_TIMEOUT),
            }),
        }
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
            // Unblock any reader currently inside ReadFile.
            unsafe {
                let _ = CancelIoEx(self.inner.read, None);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Poll the pipe until data, deadline, close, or pipe breakage.
    /// Anonymous pipes have no overlapped wait, so readiness comes from
    /// `PeekNamedPipe`.
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let deadline = match self.inner.read_timeout_ms.load(Ordering::Relaxed) {
            NO_TIMEOUT => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        };

        loop {
            if self.is_closed() {
                return Err(Error::Closed);
            }

            let mut available: u32 = 0;
            let peek = unsafe {
                PeekNamedPipe(self.inner.read, None, 0, None, Some(&mut available), None)
            };
            if let Err(e) = peek {
                // The writer side is gone; report end of stream like a
                // hung-up terminal.
                if e.code() == ERROR_BROKEN_PIPE.to_hresult() {
                    return Ok(0);
                }
                return Err(Error::Os(e.into()));
            }

            if available > 0 {
                let to_read = (available as usize).min(buf.len());
                let mut read: u32 = 0;
                let res = unsafe {
                    ReadFile(
                        self.inner.read,
                        Some(&mut buf[..to_read]),
                        Some(&mut read),
                        None,
                    )
                };
                return match res {
                    Ok(()) => Ok(read as usize),
                    Err(_) if self.is_closed() => Err(Error::Closed),
                    Err(e) if e.code() == ERROR_BROKEN_PIPE.to_hresult() => Ok(0),
                    Err(e) => Err(Error::Os(e.into())),
                };
            }

            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(Error::Timeout);
                }
            }
            std::thread::sleep(READ_POLL_INTERVAL);
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut written: u32 = 0;
        unsafe { WriteFile(self.inner.write, Some(buf), Some(&mut written), None) }
            .map_err(|e| Error::Os(e.into()))?;
        Ok(written as usize)
    }

    fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// The caller's side of a pseudo console pair.
pub struct Pty {
    handle: Handle,
    console: Arc<PseudoConsole>,
}

/// The process side of a pseudo console pair.
pub struct Tty {
    handle: Handle,
    console: Arc<PseudoConsole>,
}

impl Pty {
    /// Read VT output rendered by the console.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.handle.read(buf)
    }

    /// Write input to the attached process.
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

    pub fn try_clone(&self) -> Result<Pty> {
        Ok(Pty {
            handle: self.handle.clone(),
            console: Arc::clone(&self.console),
        })
    }

    pub fn window_size(&self) -> Result<Winsize> {
        console_size(&self.console)
    }

    /// Resize the console. Both sides observe the new size; the pixel
    /// fields are ignored, ConPTY tracks cells only.
    pub fn set_window_size(&self, size: Winsize) -> Result<()> {
        self.console.resize(size)
    }
}

impl Tty {
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
            console: Arc::clone(&self.console),
        })
    }

    pub fn window_size(&self) -> Result<Winsize> {
        console_size(&self.console)
    }

    pub fn set_window_size(&self, size: Winsize) -> Result<()> {
        self.console.resize(size)
    }

    pub(crate) fn console(&self) -> &Arc<PseudoConsole> {
        &self.console
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

fn console_size(console: &PseudoConsole) -> Result<Winsize> {
    let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
    unsafe { GetConsoleScreenBufferInfo(HANDLE(console.handle().0), &mut info) }
        .map_err(|e| Error::Os(e.into()))?;
    Ok(Winsize::new(
        (info.srWindow.Right - info.srWindow.Left + 1) as u16,
        (info.srWindow.Bottom - info.srWindow.Top + 1) as u16,
    ))
}

/// Allocate a console pair at the default 80x30 window.
pub(crate) fn open_pair() -> Result<(Pty, Tty)> {
    let mut console_in_read = HANDLE::default();
    let mut caller_in_write = HANDLE::default();
    let mut caller_out_read = HANDLE::default();
    let mut console_out_write = HANDLE::default();

    unsafe { CreatePipe(&mut console_in_read, &mut caller_in_write, None, 0) }
        .map_err(|e| Error::Os(e.into()))?;
    if let Err(e) = unsafe { CreatePipe(&mut caller_out_read, &mut console_out_write, None, 0) } {
        unsafe {
            let _ = CloseHandle(console_in_read);
            let _ = CloseHandle(caller_in_write);
        }
        return Err(Error::Os(e.into()));
    }

    let console = match PseudoConsole::new(
        Winsize::new(80, 30),
        console_in_read,
        console_out_write,
    ) {
        Ok(console) => Arc::new(console),
        Err(e) => {
            unsafe {
                let _ = CloseHandle(console_in_read);
                let _ = CloseHandle(caller_in_write);
                let _ = CloseHandle(caller_out_read);
                let _ = CloseHandle(console_out_write);
            }
            return Err(e);
        }
    };

    let pty = Pty {
        handle: Handle::new(caller_out_read, caller_in_write),
        console: Arc::clone(&console),
    };
    let tty = Tty {
        handle: Handle::new(console_in_read, console_out_write),
        console,
    };
    Ok((pty, tty))
}
