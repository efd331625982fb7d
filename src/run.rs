//! Attaching child processes to a pty
//!
//! A started child gets its own session with the slave as controlling
//! terminal and stdin/stdout/stderr wired to it. The parent keeps only
//! the master side.

use std::ffi::{CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{access, dup2, execve, execvp, fork, setsid, AccessFlags, ForkResult, Pid};

use crate::error::{Error, Result};
use crate::raw::{make_raw, RawModeState};
use crate::winsize::Winsize;
use crate::{open, Pty, Tty};

use crate::unix::FORK_LOCK;

/// A child process attached to the slave side of a pty pair.
pub struct Child {
    pid: Pid,
    reaped: bool,
}

impl Child {
    /// OS process id of the child.
    pub fn id(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Block until the child exits and return its exit code.
    ///
    /// A child killed by a signal reports `128 + signo`, following
    /// shell convention.
    pub fn wait(&mut self) -> Result<i32> {
        let status = waitpid(self.pid, None)?;
        self.reaped = true;
        Ok(exit_code(status))
    }

    /// Non-blocking variant of [`wait`](Child::wait); `None` while the
    /// child is still running.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG))? {
            WaitStatus::StillAlive => Ok(None),
            status => {
                self.reaped = true;
                Ok(Some(exit_code(status)))
            }
        }
    }

    /// Send an arbitrary signal to the child.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.pid, signal)?;
        Ok(())
    }

    /// Forcibly terminate the child. The exit status still has to be
    /// collected with [`wait`](Child::wait).
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        // Reap if the child already exited, but never block here.
        if !self.reaped {
            let _ = waitpid(self.pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

fn exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
        _ => 0,
    }
}

/// Start `program` attached to a fresh pty pair and return the master
/// side along with the child.
///
/// The slave handle is not exposed; the parent's copy is closed once
/// the child holds it as stdio.
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
/// child runs, so the program sees the final size from its first
/// `TIOCGWINSZ`.
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
    if !crate::raw::is_terminal(&tty) {
        return Err(Error::NotATerminal);
    }
    if let Some(size) = size {
        pty.set_window_size(size)?;
    }
    let child = spawn_attached(&tty, program, args, env)?;
    tty.close();
    Ok((pty, child))
}

/// [`start`] plus raw mode on the master, for hosts that relay a real
/// terminal byte-for-byte. Returns the guard that undoes raw mode.
pub fn start_with_raw<S, I, E, K, V>(
    program: S,
    args: I,
    env: Option<E>,
) -> Result<(Pty, Child, RawModeGuard)>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let (pty, child) = start(program, args, env)?;
    let guard = make_raw(&pty).and_then(|state| {
        Ok(RawModeGuard {
            pty: pty.try_clone()?,
            state,
        })
    });
    match guard {
        Ok(guard) => Ok((pty, child, guard)),
        // The child is already running at this point; don't abandon it.
        Err(e) => {
            abort_child(child);
            Err(e)
        }
    }
}

/// Kill and reap a child whose caller cannot use it, so no zombie is
/// left behind. Best effort on both steps.
fn abort_child(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Undoes the raw mode entered by [`start_with_raw`].
///
/// Restoration is explicit: dropping the guard without calling
/// [`restore`](RawModeGuard::restore) leaves the terminal raw, which is
/// the right default when the process is about to exit anyway.
pub struct RawModeGuard {
    pty: Pty,
    state: RawModeState,
}

impl RawModeGuard {
    pub fn restore(self) -> Result<()> {
        crate::raw::restore(&self.pty, &self.state)
    }
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
    // Everything the child needs is allocated before the fork; the
    // child branch only performs async-signal-safe calls. PATH lookup
    // happens here too, since execve with an explicit environment has
    // no search of its own.
    let program_cstr = cstring(program.as_ref())?;
    let resolved_cstr = cstring(resolve_program(program.as_ref()).as_os_str())?;
    let mut args_cstr = vec![program_cstr.clone()];
    for arg in args {
        args_cstr.push(cstring(arg.as_ref())?);
    }
    let env_cstr: Option<Vec<CString>> = match env {
        None => None,
        Some(vars) => {
            let mut combined = Vec::new();
            for (k, v) in vars {
                let mut bytes = k.as_ref().as_bytes().to_vec();
                bytes.push(b'=');
                bytes.extend_from_slice(v.as_ref().as_bytes());
                combined.push(
                    CString::new(bytes)
                        .map_err(|e| Error::Os(io::Error::new(io::ErrorKind::InvalidInput, e)))?,
                );
            }
            Some(combined)
        }
    };

    let slave_raw = tty.as_raw_fd();
    log::debug!(
        "starting {:?} on {}",
        program_cstr,
        tty.path().display()
    );

    let guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let fork_result = unsafe { fork() }?;
    drop(guard);

    match fork_result {
        ForkResult::Parent { child } => Ok(Child {
            pid: child,
            reaped: false,
        }),
        ForkResult::Child => {
            if setsid().is_err() {
                unsafe { libc::_exit(1) };
            }
            if !unsafe { set_controlling_tty(slave_raw) } {
                unsafe { libc::_exit(1) };
            }
            for stdio in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                if dup2(slave_raw, stdio).is_err() {
                    unsafe { libc::_exit(1) };
                }
            }
            // The slave fd itself and the master are close-on-exec.
            let _ = match env_cstr {
                Some(env) => execve(&resolved_cstr, &args_cstr, &env),
                None => execvp(&program_cstr, &args_cstr),
            };
            unsafe { libc::_exit(127) };
        }
    }
}

/// Find `program` on PATH. Names containing a separator pass through
/// unchanged; an unresolvable bare name also passes through, so the
/// exec itself reports the failure (exit 127) like any other.
fn resolve_program(program: &OsStr) -> std::path::PathBuf {
    let candidate = std::path::Path::new(program);
    if program.as_bytes().contains(&b'/') {
        return candidate.to_path_buf();
    }
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let full = dir.join(candidate);
            if access(&full, AccessFlags::X_OK).is_ok() {
                return full;
            }
        }
    }
    candidate.to_path_buf()
}

fn cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes())
        .map_err(|e| Error::Os(io::Error::new(io::ErrorKind::InvalidInput, e)))
}

#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
unsafe fn set_controlling_tty(fd: RawFd) -> bool {
    libc::ioctl(fd, libc::TIOCSCTTY as libc::c_ulong, 0) >= 0
}

// On STREAMS ptys the first open of the slave after setsid makes it the
// controlling terminal, and the fd is already open.
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
unsafe fn set_controlling_tty(_fd: RawFd) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const NO_ENV: Option<Vec<(String, String)>> = None;

    fn read_until(pty: &Pty, needle: &[u8]) -> Vec<u8> {
        pty.set_read_timeout(Some(Duration::from_secs(5)));
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match pty.read(&mut buf) {
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    if out.windows(needle.len()).any(|w| w == needle) {
                        return out;
                    }
                }
                Err(e) => panic!("read failed before match: {e}; got {:?}", out),
            }
        }
    }

    #[test]
    fn started_child_writes_to_master() {
        let (pty, mut child) = start("echo", ["hello", "pty"], NO_ENV).expect("start echo");
        let out = read_until(&pty, b"hello pty");
        assert!(out.windows(9).any(|w| w == b"hello pty"));
        assert_eq!(child.wait().expect("wait"), 0);
    }

    #[test]
    fn child_sees_configured_window_size() {
        let size = Winsize::new(97, 43);
        let (pty, mut child) =
            start_with_size("stty", ["size"], NO_ENV, Some(size)).expect("start stty");
        let out = read_until(&pty, b"43 97");
        assert!(out.windows(5).any(|w| w == b"43 97"));
        assert_eq!(child.wait().expect("wait"), 0);
    }

    #[test]
    fn child_stdin_is_a_terminal() {
        let (_pty, mut child) = start("test", ["-t", "0"], NO_ENV).expect("start test -t");
        assert_eq!(child.wait().expect("wait"), 0);
    }

    #[test]
    fn cat_round_trips_input() {
        let (pty, mut child) = start("cat", Vec::<String>::new(), NO_ENV).expect("start cat");
        pty.write_all(b"roundtrip\n").expect("write");
        // Both the line-discipline echo and cat's copy carry the text.
        let out = read_until(&pty, b"roundtrip");
        assert!(out.windows(9).any(|w| w == b"roundtrip"));
        child.kill().expect("kill");
        let _ = child.wait();
    }

    #[test]
    fn exit_codes_propagate() {
        let (_pty, mut child) = start("false", Vec::<String>::new(), NO_ENV).expect("start false");
        assert_eq!(child.wait().expect("wait"), 1);
    }

    #[test]
    fn missing_program_exits_127() {
        let (_pty, mut child) = start(
            "definitely-not-a-real-program-1f2e3d",
            Vec::<String>::new(),
            NO_ENV,
        )
        .expect("fork itself succeeds");
        assert_eq!(child.wait().expect("wait"), 127);
    }

    #[test]
    fn env_replaces_child_environment() {
        let env = vec![
            ("PATH", "/usr/bin:/bin"),
            ("PTY_TEST_MARKER", "present"),
        ];
        let (pty, mut child) =
            start("env", Vec::<String>::new(), Some(env)).expect("start env");
        let out = read_until(&pty, b"PTY_TEST_MARKER=present");
        assert!(out
            .windows(b"PTY_TEST_MARKER=present".len())
            .any(|w| w == b"PTY_TEST_MARKER=present"));
        assert_eq!(child.wait().expect("wait"), 0);
    }

    #[test]
    fn kill_reports_signal_exit() {
        let (_pty, mut child) = start("sleep", ["30"], NO_ENV).expect("start sleep");
        child.kill().expect("kill");
        assert_eq!(child.wait().expect("wait"), 128 + Signal::SIGKILL as i32);
    }

    #[test]
    fn try_wait_reports_running_then_exited() {
        let (_pty, mut child) = start("sleep", ["0.2"], NO_ENV).expect("start sleep");
        // Usually still running immediately after spawn; either way the
        // call itself must succeed.
        let _ = child.try_wait().expect("try_wait");
        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(child.try_wait().expect("try_wait"), Some(0));
    }

    #[test]
    fn abort_kills_and_reaps_the_child() {
        let (_pty, child) = start("sleep", ["30"], NO_ENV).expect("start sleep");
        let pid = Pid::from_raw(child.id());
        abort_child(child);
        // Reaped means the pid is no longer signalable from here.
        assert_eq!(kill(pid, None), Err(nix::errno::Errno::ESRCH));
    }

    #[test]
    fn raw_start_restores_on_demand() {
        let (pty, mut child, guard) =
            start_with_raw("cat", Vec::<String>::new(), NO_ENV).expect("start cat");
        guard.restore().expect("restore");
        child.kill().expect("kill");
        let _ = child.wait();
        drop(pty);
    }
}
