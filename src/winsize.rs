//! Terminal window size

use crate::error::Result;
use crate::{Pty, Tty};

/// Terminal size in character cells and (best-effort) pixels.
///
/// Querying the same underlying terminal from either side of a pair
/// returns an identical `Winsize`. The pixel fields are
/// platform-dependent; Windows always reports them as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Winsize {
    /// Number of rows (character cells)
    pub rows: u16,
    /// Number of columns (character cells)
    pub cols: u16,
    /// Width in pixels (optional, can be 0)
    pub pixel_width: u16,
    /// Height in pixels (optional, can be 0)
    pub pixel_height: u16,
}

impl Winsize {
    /// Create a new window size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Create a window size with pixel dimensions
    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width,
            pixel_height,
        }
    }
}

impl Default for Winsize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

#[cfg(unix)]
impl From<libc::winsize> for Winsize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

#[cfg(unix)]
impl From<Winsize> for libc::winsize {
    fn from(ws: Winsize) -> Self {
        libc::winsize {
            ws_row: ws.rows,
            ws_col: ws.cols,
            ws_xpixel: ws.pixel_width,
            ws_ypixel: ws.pixel_height,
        }
    }
}

/// Read the terminal size of any file descriptor with `TIOCGWINSZ`.
///
/// Works identically on the master or slave side of a pair, and on a
/// caller's own stdin/stdout when those are terminals.
#[cfg(unix)]
pub fn get_winsize<F: std::os::fd::AsFd>(f: &F) -> Result<Winsize> {
    use std::os::fd::AsRawFd;

    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(f.as_fd().as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };
    if rc < 0 {
        return Err(nix::errno::Errno::last().into());
    }
    Ok(Winsize::from(ws))
}

/// Set the terminal size of any file descriptor with `TIOCSWINSZ`.
#[cfg(unix)]
pub fn set_winsize<F: std::os::fd::AsFd>(f: &F, size: Winsize) -> Result<()> {
    use std::os::fd::AsRawFd;

    let ws = libc::winsize::from(size);
    let rc = unsafe { libc::ioctl(f.as_fd().as_raw_fd(), libc::TIOCSWINSZ, &ws) };
    if rc < 0 {
        return Err(nix::errno::Errno::last().into());
    }
    Ok(())
}

/// Apply the terminal size of `pty` to `tty`.
///
/// Intended to be called whenever the host application observes a
/// window size change on the controlling side (e.g. from a SIGWINCH
/// handler), so that out-of-band size changes propagate to the
/// terminal device. The crate itself installs no signal handler.
pub fn inherit_size(pty: &Pty, tty: &Tty) -> Result<()> {
    let size = pty.window_size()?;
    tty.set_window_size(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_80_by_24() {
        let size = Winsize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
        assert_eq!(size.pixel_width, 0);
        assert_eq!(size.pixel_height, 0);
    }

    #[test]
    fn new_leaves_pixels_zero() {
        let size = Winsize::new(120, 40);
        assert_eq!(size.cols, 120);
        assert_eq!(size.rows, 40);
        assert_eq!(size.pixel_width, 0);
        assert_eq!(size.pixel_height, 0);
    }

    #[test]
    fn with_pixels_keeps_all_fields() {
        let size = Winsize::with_pixels(80, 24, 800, 600);
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
        assert_eq!(size.pixel_width, 800);
        assert_eq!(size.pixel_height, 600);
    }

    #[cfg(unix)]
    #[test]
    fn winsize_round_trips_through_libc() {
        let size = Winsize::with_pixels(132, 50, 1024, 768);
        let raw: libc::winsize = size.into();
        assert_eq!(raw.ws_col, 132);
        assert_eq!(raw.ws_row, 50);
        assert_eq!(Winsize::from(raw), size);
    }

    #[cfg(unix)]
    #[test]
    fn get_winsize_rejects_non_terminal() {
        let file = std::fs::File::open("/dev/null").expect("open /dev/null");
        assert!(get_winsize(&file).is_err());
    }
}
