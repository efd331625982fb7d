//! crosspty - cross-platform pseudo-terminal pairs
//!
//! This crate allocates pty/tty pairs, sizes them, toggles raw mode,
//! and attaches child processes to them, with a uniform API over the
//! Unix pty drivers and the Windows pseudo console (ConPTY).
//!
//! Key features:
//! - PTY pair allocation on Linux, macOS, the BSDs, Solaris/illumos,
//!   and Windows 10 1809+
//! - Child process spawning with proper session and controlling
//!   terminal setup
//! - Window size management on either side of a pair
//! - Raw mode with explicit save/restore
//! - Reads that honor per-handle deadlines and unblock on close
//!
//! ```no_run
//! use crosspty::{start, Winsize};
//!
//! # fn main() -> crosspty::Result<()> {
//! let (pty, mut child) = start("ls", ["-l"], None::<Vec<(String, String)>>)?;
//! let mut buf = [0u8; 4096];
//! while let Ok(n) = pty.read(&mut buf) {
//!     print!("{}", String::from_utf8_lossy(&buf[..n]));
//! }
//! child.wait()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod provider;
mod winsize;

#[cfg(unix)]
mod raw;
#[cfg(unix)]
mod run;
#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
mod win;
#[cfg(windows)]
use win as sys;

#[cfg(not(any(unix, windows)))]
mod unsupported;
#[cfg(not(any(unix, windows)))]
use unsupported as sys;

pub use error::{Error, Result};
pub use provider::{NativeProvider, PtyProvider};
pub use sys::{Pty, Tty};
pub use winsize::{inherit_size, Winsize};

#[cfg(unix)]
pub use nix::sys::signal::Signal;
#[cfg(unix)]
pub use raw::{is_terminal, make_raw, restore, RawModeState};
#[cfg(unix)]
pub use run::{start, start_with_raw, start_with_size, Child, RawModeGuard};
#[cfg(unix)]
pub use winsize::{get_winsize, set_winsize};

#[cfg(windows)]
pub use win::run::{start, start_with_size, Child};

/// Allocate a pseudo-terminal pair.
///
/// The returned handles are independent of any other pair and both
/// sides report the same window size at all times. On platforms with no
/// pty support this returns [`Error::Unsupported`].
pub fn open() -> Result<(Pty, Tty)> {
    sys::open_pair()
}
