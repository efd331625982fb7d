//! ConPTY entry points and the pseudo console wrapper
//!
//! The pseudo console API only exists on Windows 10 1809 and later, so
//! the kernel32 entry points are resolved once at first use instead of
//! being linked; on older systems every operation fails with
//! [`Error::MissingApi`] instead of aborting the process at load time.

use std::sync::OnceLock;

use windows::core::{HRESULT, PCSTR, PCWSTR};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{COORD, HPCON};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

use crate::error::{Error, Result};
use crate::winsize::Winsize;

type CreatePseudoConsoleFn =
    unsafe extern "system" fn(COORD, HANDLE, HANDLE, u32, *mut HPCON) -> HRESULT;
type ResizePseudoConsoleFn = unsafe extern "system" fn(HPCON, COORD) -> HRESULT;
type ClosePseudoConsoleFn = unsafe extern "system" fn(HPCON);

struct ConptyApi {
    create: CreatePseudoConsoleFn,
    resize: ResizePseudoConsoleFn,
    close: ClosePseudoConsoleFn,
}

static API: OnceLock<std::result::Result<ConptyApi, &'static str>> = OnceLock::new();

fn resolve() -> std::result::Result<ConptyApi, &'static str> {
    // kernel32 is always loaded; only the individual exports can be
    // missing.
    let kernel32: Vec<u16> = "kernel32.dll\0".encode_utf16().collect();
    let module = unsafe { GetModuleHandleW(PCWSTR(kernel32.as_ptr())) }
        .map_err(|_| "kernel32.dll")?;

    macro_rules! entry {
        ($name:literal, $ty:ty) => {{
            let addr = unsafe {
                GetProcAddress(module, PCSTR(concat!($name, "\0").as_ptr()))
            };
            match addr {
                Some(f) => unsafe { std::mem::transmute::<_, $ty>(f) },
                None => return Err($name),
            }
        }};
    }

    Ok(ConptyApi {
        create: entry!("CreatePseudoConsole", CreatePseudoConsoleFn),
        resize: entry!("ResizePseudoConsole", ResizePseudoConsoleFn),
        close: entry!("ClosePseudoConsole", ClosePseudoConsoleFn),
    })
}

fn api() -> Result<&'static ConptyApi> {
    API.get_or_init(resolve)
        .as_ref()
        .map_err(|name| Error::MissingApi(*name))
}

fn hresult_err(hr: HRESULT) -> Error {
    Error::Os(windows::core::Error::from_hresult(hr).into())
}

/// An owned pseudo console, shared between both sides of a pair.
///
/// Closing happens on drop of the last reference, after the pipe
/// handles are gone, matching the documented ConPTY teardown order.
pub(crate) struct PseudoConsole {
    hpc: HPCON,
}

// The pseudo console handle is only ever passed to kernel32 calls that
// are documented as thread-safe.
unsafe impl Send for PseudoConsole {}
unsafe impl Sync for PseudoConsole {}

impl PseudoConsole {
    /// Create a console of `size` wired to the given pipe ends. The
    /// console duplicates the handles internally; the caller still owns
    /// the ones it passed.
    pub(crate) fn new(size: Winsize, input: HANDLE, output: HANDLE) -> Result<Self> {
        let api = api()?;
        let coord = coord_of(size);
        let mut hpc = HPCON::default();
        let hr = unsafe { (api.create)(coord, input, output, 0, &mut hpc) };
        if hr.is_err() {
            return Err(hresult_err(hr));
        }
        log::debug!("created pseudo console {}x{}", size.cols, size.rows);
        Ok(PseudoConsole { hpc })
    }

    pub(crate) fn resize(&self, size: Winsize) -> Result<()> {
        let api = api()?;
        let hr = unsafe { (api.resize)(self.hpc, coord_of(size)) };
        if hr.is_err() {
            return Err(hresult_err(hr));
        }
        Ok(())
    }

    /// The raw console handle, for the process attribute list and for
    /// screen buffer queries.
    pub(crate) fn handle(&self) -> HPCON {
        self.hpc
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        if let Ok(api) = api() {
            unsafe { (api.close)(self.hpc) };
        }
    }
}

fn coord_of(size: Winsize) -> COORD {
    COORD {
        X: size.cols as i16,
        Y: size.rows as i16,
    }
}
