//! Raw mode control for Unix terminals
//!
//! The kernel tty driver keeps one line-discipline state per terminal
//! device, shared between the master and slave side of a pair, so raw
//! mode may be toggled through either handle.

use std::os::fd::AsFd;

use nix::sys::termios::{self, SetArg, Termios};

use crate::error::Result;

/// Opaque snapshot of a terminal's line-discipline attributes.
///
/// Only produced by [`make_raw`] and consumed by [`restore`]; it has no
/// meaning beyond restoring a terminal to its prior mode.
#[derive(Debug, Clone)]
pub struct RawModeState(Termios);

/// Whether the handle refers to a terminal device.
///
/// True iff the line-discipline attribute ioctl succeeds on it.
pub fn is_terminal<F: AsFd>(f: &F) -> bool {
    termios::tcgetattr(f.as_fd()).is_ok()
}

/// Switch the terminal into raw mode, returning the pre-change snapshot.
///
/// Disables input translation (8th-bit stripping, CR/NL mapping, flow
/// control), local echo, canonical line assembly, and signal
/// generation, as a single read-modify-write against one coherent
/// attribute snapshot.
///
/// If the read step fails the terminal is left unmodified. If the write
/// step fails after a successful read, the terminal may be left in a
/// partially-modified state; no retry is attempted.
pub fn make_raw<F: AsFd>(f: &F) -> Result<RawModeState> {
    let orig = termios::tcgetattr(f.as_fd())?;
    let mut raw = orig.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(f.as_fd(), SetArg::TCSANOW, &raw)?;
    Ok(RawModeState(orig))
}

/// Write a previously captured snapshot back to the terminal.
pub fn restore<F: AsFd>(f: &F, state: &RawModeState) -> Result<()> {
    termios::tcsetattr(f.as_fd(), SetArg::TCSANOW, &state.0)?;
    Ok(())
}
