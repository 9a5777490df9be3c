//! Debugger-backed backtrace capture.
//!
//! ```text
//!   this process                          debugger (child)
//!   ────────────                          ────────────────
//!   commands ──► cmd pipe ──────────────► stdin
//!   poll(1 s) ◄─ out pipe ◄────────────── stdout + stderr
//!      │
//!      └─► LineAssembler ──► frame lines ──► sink
//! ```
//!
//! The capture loop ends on EOF, or on a poll timeout once SIGCHLD fired
//! and `waitpid` confirms it was the debugger that exited. There is no wall-clock limit: a debugger
//! that never exits keeps the loop alive.

// Rust guideline compliant 2026-02

use std::cell::Cell;
use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use super::lines::LineAssembler;
use crate::config::Config;
use crate::wire::pipe::pipe;

/// Something that can print a backtrace of the current process.
///
/// Called at most once, from the fatal-signal handler, so implementations
/// must not take locks that the interrupted code might hold.
pub trait CrashReporter: Send + Sync {
    /// Capture a backtrace and hand each frame line to `sink`.
    ///
    /// # Errors
    ///
    /// Any failure to start or talk to the backend. The caller carries on
    /// with the fatal exit either way.
    fn report(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()>;
}

/// Attaches an external debugger (gdb by default) to this process.
#[derive(Debug)]
pub struct GdbReporter {
    program: CString,
    args: [CString; 4],
    commands: Vec<u8>,
    poll_timeout_ms: libc::c_int,
    child_exited: Arc<AtomicBool>,
}

impl GdbReporter {
    /// Prepare everything the signal handler will need: argument strings,
    /// the command script and the SIGCHLD flag.
    ///
    /// # Errors
    ///
    /// A debugger path or command with an interior NUL, or failure to
    /// register the SIGCHLD flag.
    pub fn new(config: &Config) -> Result<Self> {
        let program = CString::new(config.debugger.as_os_str().as_bytes())
            .context("debugger path contains a NUL byte")?;
        let pid = std::process::id().to_string();
        let args = [
            CString::new("-q")?,
            CString::new("-nx")?,
            CString::new("-p")?,
            CString::new(pid)?,
        ];

        let mut commands = Vec::new();
        for cmd in &config.debugger_commands {
            anyhow::ensure!(!cmd.contains('\n'), "debugger command '{cmd}' spans lines");
            commands.extend_from_slice(cmd.as_bytes());
            commands.push(b'\n');
        }

        let child_exited = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGCHLD, Arc::clone(&child_exited))
            .context("Failed to register SIGCHLD flag")?;

        Ok(Self {
            program,
            args,
            commands,
            poll_timeout_ms: libc::c_int::try_from(config.poll_interval_ms).unwrap_or(libc::c_int::MAX),
            child_exited,
        })
    }

    /// Debugger executable.
    pub fn program(&self) -> &OsStr {
        OsStr::from_bytes(self.program.as_bytes())
    }
}

impl CrashReporter for GdbReporter {
    fn report(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()> {
        let (cmd_read, mut cmd_write) = pipe()?;
        let (out_read, out_write) = pipe()?;

        let argv: [*const libc::c_char; 6] = [
            self.program.as_ptr(),
            self.args[0].as_ptr(),
            self.args[1].as_ptr(),
            self.args[2].as_ptr(),
            self.args[3].as_ptr(),
            std::ptr::null(),
        ];

        self.child_exited.store(false, Ordering::SeqCst);
        // SAFETY: the child only calls dup2, execvp and _exit.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(io::Error::last_os_error());
        }
        if pid == 0 {
            // SAFETY: async-signal-safe calls on descriptors we own; argv
            // is NUL-terminated and outlives the exec.
            unsafe {
                libc::dup2(cmd_read.as_raw_fd(), libc::STDIN_FILENO);
                libc::dup2(out_write.as_raw_fd(), libc::STDOUT_FILENO);
                libc::dup2(out_write.as_raw_fd(), libc::STDERR_FILENO);
                libc::execvp(self.program.as_ptr(), argv.as_ptr());
                libc::_exit(127);
            }
        }

        // Reap the debugger on every path out of here.
        let reaped = Cell::new(false);
        let _reap = scopeguard::guard(pid, |pid| {
            if !reaped.get() {
                let mut status = 0;
                // SAFETY: `pid` is our direct child and not yet reaped.
                unsafe { libc::waitpid(pid, &mut status, 0) };
            }
        });

        allow_ptrace_by(pid);

        // Child-side ends belong to the debugger now.
        drop(cmd_read);
        drop(out_write);

        // EPIPE here just means the debugger died early; the capture loop
        // still collects whatever it printed.
        let _ = cmd_write.write_all(&self.commands);
        drop(cmd_write);

        let mut gone = || debugger_exited(pid, &self.child_exited, &reaped);
        capture(&out_read, self.poll_timeout_ms, &mut gone, sink)
    }
}

/// Whether `pid` itself has exited. SIGCHLD only says that some child did,
/// so the flag gates a non-blocking `waitpid` on the debugger.
fn debugger_exited(pid: libc::pid_t, sigchld: &AtomicBool, reaped: &Cell<bool>) -> bool {
    if reaped.get() {
        return true;
    }
    if !sigchld.load(Ordering::SeqCst) {
        return false;
    }
    let mut status = 0;
    // SAFETY: non-blocking wait on our own child.
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret == pid {
        reaped.set(true);
    }
    // ECHILD: someone else reaped it; either way it is gone.
    ret != 0
}

/// Let `pid` attach to us when Yama restricts ptrace to descendants.
#[cfg(target_os = "linux")]
fn allow_ptrace_by(pid: libc::pid_t) {
    // SAFETY: plain prctl with scalar arguments.
    unsafe { libc::prctl(libc::PR_SET_PTRACER, pid as libc::c_ulong, 0, 0, 0) };
}

#[cfg(not(target_os = "linux"))]
fn allow_ptrace_by(_pid: libc::pid_t) {}

/// Read `out` one byte at a time and emit every completed frame line.
///
/// An idle poll ends the loop once `debugger_gone` says so.
pub(crate) fn capture(
    out: &File,
    timeout_ms: libc::c_int,
    debugger_gone: &mut dyn FnMut() -> bool,
    sink: &mut dyn FnMut(&str),
) -> io::Result<()> {
    let fd: RawFd = out.as_raw_fd();
    let mut assembler = LineAssembler::new();
    loop {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ready == 0 {
            if debugger_gone() {
                break;
            }
            continue;
        }

        if pollfd.revents & libc::POLLIN == 0 {
            // POLLHUP/POLLERR with nothing left to read.
            break;
        }
        let mut byte = 0u8;
        // SAFETY: reads at most one byte into a live stack slot.
        let n = unsafe { libc::read(fd, (&mut byte as *mut u8).cast(), 1) };
        match n {
            0 => break,
            n if n < 0 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            _ => {
                if let Some(line) = assembler.push(byte) {
                    sink(&line);
                }
            }
        }
    }
    if let Some(line) = assembler.finish() {
        sink(&line);
    }
    Ok(())
}
