//! Provider abstraction over the platform pty implementation
//!
//! The free functions in the crate root delegate to [`NativeProvider`];
//! the trait exists so hosts can substitute their own allocation
//! strategy (or a mock) and so capabilities can be queried up front
//! instead of discovered through `Unsupported` errors.

use crate::error::{Error, Result};
use crate::{Pty, Tty};

/// A source of pseudo-terminal pairs.
pub trait PtyProvider: Send + Sync {
    /// Whether this provider can allocate pairs at all on the running
    /// system. When this returns false, [`open_pair`] returns
    /// [`Error::Unsupported`] rather than an OS error.
    ///
    /// [`open_pair`]: PtyProvider::open_pair
    fn is_supported(&self) -> bool;

    /// Whether slave handles expose a filesystem path that can be
    /// reopened by name. False on Windows, where the console pair has
    /// no device node.
    fn has_device_paths(&self) -> bool;

    /// Allocate a fresh master/slave pair.
    fn open_pair(&self) -> Result<(Pty, Tty)>;
}

/// The operating system's own pty implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProvider;

impl PtyProvider for NativeProvider {
    fn is_supported(&self) -> bool {
        cfg!(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "solaris",
            target_os = "illumos",
            windows
        ))
    }

    fn has_device_paths(&self) -> bool {
        self.is_supported() && cfg!(unix)
    }

    fn open_pair(&self) -> Result<(Pty, Tty)> {
        if !self.is_supported() {
            return Err(Error::Unsupported);
        }
        crate::sys::open_pair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_provider_reports_support() {
        let provider = NativeProvider;
        assert!(provider.is_supported());
        #[cfg(unix)]
        assert!(provider.has_device_paths());
        #[cfg(windows)]
        assert!(!provider.has_device_paths());
    }

    #[test]
    fn native_provider_opens_pairs() {
        let provider = NativeProvider;
        let (pty, _tty) = provider.open_pair().expect("open pair");
        drop(pty);
    }

    #[test]
    fn provider_is_object_safe() {
        let provider: Box<dyn PtyProvider> = Box::new(NativeProvider);
        assert!(provider.is_supported());
    }
}
