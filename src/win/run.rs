//! Attaching child processes to a pseudo console
//!
//! The console handle travels to the child through an explicit
//! `PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE` entry in an extended startup
//! info block; the child's stdio is then wired up by the console host,
//! not by handle inheritance.

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Console::HPCON;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT, INFINITE,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};

use crate::error::{Error, Result};
use crate::winsize::Winsize;
use crate::{open, Pty, Tty};

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x0002_0016;

/// A child process attached to a pseudo console.
pub struct Child {
    process: HANDLE,
    thread: HANDLE,
    pid: u32,
    // Keeps the console-side pipe ends alive for the child's lifetime;
    // the console host writes into them until the process exits.
    _tty: Option<Tty>,
}

unsafe impl Send for Child {}

impl Child {
    /// OS process id of the child.
    pub fn id(&self) -> i32 {
        self.pid as i32
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&mut self) -> Result<i32> {
        unsafe { WaitForSingleObject(self.process, INFINITE) };
        let mut code: u32 = 0;
        unsafe { GetExitCodeProcess(self.process, &mut code) }
            .map_err(|e| Error::Os(e.into()))?;
        Ok(code as i32)
    }

    /// Non-blocking variant of [`wait`](Child::wait); `None` while the
    /// child is still running.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match unsafe { WaitForSingleObject(self.process, 0) } {
            WAIT_OBJECT_0 => {
                let mut code: u32 = 0;
                unsafe { GetExitCodeProcess(self.process, &mut code) }
                    .map_err(|e| Error::Os(e.into()))?;
                Ok(Some(code as i32))
            }
            WAIT_TIMEOUT => Ok(None),
            _ => Err(Error::Os(std::io::Error::last_os_error())),
        }
    }

    /// Forcibly terminate the child.
    pub fn kill(&self) -> Result<()> {
        unsafe { TerminateProcess(self.process, 1) }.map_err(|e| Error::Os(e.into()))?;
        Ok(())
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.process);
            let _ = CloseHandle(self.thread);
        }
    }
}

/// Start `program` attached to a fresh pseudo console pair and return
/// the caller side along with the child.
pub fn start<S, I, E, K, V>(program: S, args: I, env: Option<E>) -> Result<(Pty, Child)>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    start_with_size(program, args, env, None)
}

/// [`start`] with an explicit initial window size applied before the
/// child runs.
pub fn start_with_size<S, I, E, K, V>(
    program: S,
    args: I,
    env: Option<E>,
    size: Option<Winsize>,
) -> Result<(Pty, Child)>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let (pty, tty) = open()?;
    if let Some(size) = size {
        pty.set_window_size(size)?;
    }
    let mut child = spawn_attached(&tty, program, args, env)?;
    child._tty = Some(tty);
    Ok((pty, child))
}

fn spawn_attached<S, I, E, K, V>(tty: &Tty, program: S, args: I, env: Option<E>) -> Result<Child>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut cmdline = quote_arg(program.as_ref());
    for arg in args {
        cmdline.push(' ');
        cmdline.push_str(&quote_arg(arg.as_ref()));
    }
    let mut cmdline_wide: Vec<u16> = OsStr::new(&cmdline)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let env_block: Option<Vec<u16>> = env.map(|vars| {
        let mut block = Vec::new();
        for (k, v) in vars {
            block.extend(k.as_ref().encode_wide());
            block.push('=' as u16);
            block.extend(v.as_ref().encode_wide());
            block.push(0);
        }
        block.push(0);
        block
    });

    let hpc = tty.console().handle();

    // First call reports the required buffer size and fails by design.
    let mut attr_size: usize = 0;
    let _ = unsafe {
        InitializeProcThreadAttributeList(
            LPPROC_THREAD_ATTRIBUTE_LIST::default(),
            1,
            0,
            &mut attr_size,
        )
    };
    if attr_size == 0 {
        return Err(Error::Os(std::io::Error::last_os_error()));
    }
    let mut attr_buf = vec![0u8; attr_size];
    let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_buf.as_mut_ptr().cast());
    unsafe { InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_size) }
        .map_err(|e| Error::Os(e.into()))?;

    let mut spawn = || -> Result<PROCESS_INFORMATION> {
        unsafe {
            UpdateProcThreadAttribute(
                attr_list,
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                Some(hpc.0 as *const _),
                std::mem::size_of::<HPCON>(),
                None,
                None,
            )
        }
        .map_err(|e| Error::Os(e.into()))?;

        let mut startup = STARTUPINFOEXW {
            StartupInfo: unsafe { std::mem::zeroed() },
            lpAttributeList: attr_list,
        };
        startup.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

        let mut info = PROCESS_INFORMATION::default();
        let env_ptr = env_block
            .as_ref()
            .map(|b| b.as_ptr() as *const std::ffi::c_void);
        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(cmdline_wide.as_mut_ptr()),
                None,
                None,
                false,
                EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
                env_ptr,
                PCWSTR::null(),
                &startup.StartupInfo,
                &mut info,
            )
        }
        .map_err(|e| Error::Os(e.into()))?;
        Ok(info)
    };

    let result = spawn();
    unsafe { DeleteProcThreadAttributeList(attr_list) };
    let info = result?;

    log::debug!("started {:?} as pid {}", cmdline, info.dwProcessId);
    Ok(Child {
        process: info.hProcess,
        thread: info.hThread,
        pid: info.dwProcessId,
        _tty: None,
    })
}

/// Quote one argument per the MSVCRT command-line parsing rules.
fn quote_arg(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if !s.is_empty() && !s.contains([' ', '\t', '"']) {
        return s.into_owned();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in s.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                out.push('\\');
            }
            '"' => {
                // Backslashes before a quote must be doubled, plus an
                // escape for the quote itself.
                out.extend(std::iter::repeat('\\').take(backslashes + 1));
                out.push('"');
                backslashes = 0;
            }
            c => {
                backslashes = 0;
                out.push(c);
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes));
    out.push('"');
    out
}
