//! Fatal-signal handling for extension processes.
//!
//! On the first fatal signal the handler prints the signal name, asks the
//! [`CrashReporter`] for a backtrace (unless the stack-trace mode is
//! `never`), tells the host we are gone with a pre-encoded QUIT frame, then
//! restores the default disposition and re-raises so the process dies with
//! the original signal.
//!
//! A second fatal signal while the first is being handled (the reporter
//! itself faulted, or the user hit Ctrl-C during capture) skips straight to
//! the re-raise. [`SignalGuard`] is the state machine behind that rule.
//!
//! Termination signals (`SIGHUP`, `SIGINT`, `SIGQUIT`, `SIGTERM`) take the
//! same path without the backtrace.
//!
//! Nothing in the handler logs: the `log` backends lock and allocate.

// Rust guideline compliant 2026-02

pub mod debugger;
pub mod lines;

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use anyhow::{Context, Result};

use crate::config::{Config, StackTraceMode};
use crate::wire::framing::{Header, HEADER_LEN};
use crate::wire::MessageKind;

pub use debugger::{CrashReporter, GdbReporter};
pub use lines::{assemble_lines, LineAssembler};

/// Signals that mean the process is broken.
pub const FATAL_SIGNALS: [libc::c_int; 5] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGABRT,
];

/// Signals that ask the process to stop.
pub const TERMINATION_SIGNALS: [libc::c_int; 4] =
    [libc::SIGHUP, libc::SIGINT, libc::SIGQUIT, libc::SIGTERM];

// ─── Re-entrancy guard ─────────────────────────────────────────────────────

/// What the handler should do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalAction {
    /// First delivery: report, notify the host, then die.
    Report,
    /// Already handling a signal: die now with default handling.
    Reraise,
}

/// Once-only gate for the reporting path.
#[derive(Debug)]
pub struct SignalGuard {
    entered: AtomicBool,
}

impl SignalGuard {
    /// A guard that has not seen a signal yet.
    pub const fn new() -> Self {
        Self {
            entered: AtomicBool::new(false),
        }
    }

    /// Record a delivery and decide what to do with it.
    pub fn enter(&self) -> FatalAction {
        if self.entered.swap(true, Ordering::SeqCst) {
            FatalAction::Reraise
        } else {
            FatalAction::Report
        }
    }
}

impl Default for SignalGuard {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Installed state ───────────────────────────────────────────────────────

struct CrashState {
    reporter: Option<Box<dyn CrashReporter>>,
    quit_fd: Option<RawFd>,
    quit_frame: [u8; HEADER_LEN],
}

static GUARD: SignalGuard = SignalGuard::new();
static STATE: OnceLock<CrashState> = OnceLock::new();

/// Install handlers according to `config`.
///
/// `quit_fd` is the extension's write end of the host pipe; the handler
/// writes a QUIT frame there before the process dies.
///
/// # Errors
///
/// Handlers already installed, a bad debugger configuration, or a failed
/// `sigaction`.
pub fn install(config: &Config, quit_fd: Option<RawFd>) -> Result<()> {
    let reporter: Option<Box<dyn CrashReporter>> = match config.stack_trace {
        StackTraceMode::Never => None,
        StackTraceMode::Always => Some(Box::new(GdbReporter::new(config)?)),
    };
    install_with(reporter, quit_fd)
}

/// Install handlers with an explicit reporter backend.
///
/// # Errors
///
/// See [`install`].
pub fn install_with(reporter: Option<Box<dyn CrashReporter>>, quit_fd: Option<RawFd>) -> Result<()> {
    let quit_frame = Header {
        kind: MessageKind::Quit.as_raw(),
        payload_size: 0,
    }
    .encode()?;
    STATE
        .set(CrashState {
            reporter,
            quit_fd,
            quit_frame,
        })
        .map_err(|_| anyhow::anyhow!("crash handlers already installed"))?;

    for sig in FATAL_SIGNALS.into_iter().chain(TERMINATION_SIGNALS) {
        set_disposition(sig, on_signal as libc::sighandler_t)
            .with_context(|| format!("Failed to install handler for {}", signal_name(sig)))?;
    }
    log::debug!("[crash] handlers installed");
    Ok(())
}

fn set_disposition(sig: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    // SAFETY: zeroed sigaction is a valid starting point; every field we
    // rely on is set below.
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler;
    // NODEFER lets a nested delivery reach the guard instead of staying
    // blocked until the handler returns.
    action.sa_flags = libc::SA_NODEFER;
    // SAFETY: `action.sa_mask` is a live sigset_t.
    unsafe { libc::sigemptyset(&mut action.sa_mask) };
    // SAFETY: valid signal number and a fully initialised action.
    let ret = unsafe { libc::sigaction(sig, &action, std::ptr::null_mut()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ─── Handler ───────────────────────────────────────────────────────────────

extern "C" fn on_signal(sig: libc::c_int) {
    if GUARD.enter() == FatalAction::Report {
        write_stderr(b"extlink: received ");
        write_stderr(signal_name(sig).as_bytes());
        write_stderr(b"\n");

        if let Some(state) = STATE.get() {
            let wants_trace = FATAL_SIGNALS.contains(&sig);
            if let (true, Some(reporter)) = (wants_trace, state.reporter.as_deref()) {
                let mut sink = |line: &str| {
                    write_stderr(line.as_bytes());
                    write_stderr(b"\n");
                };
                if reporter.report(&mut sink).is_err() {
                    write_stderr(b"extlink: could not capture a backtrace\n");
                }
            }
            if let Some(fd) = state.quit_fd {
                write_all_raw(fd, &state.quit_frame);
            }
        }
    }

    // Default disposition, then die from the same signal.
    let _ = set_disposition(sig, libc::SIG_DFL);
    // SAFETY: raise is async-signal-safe.
    unsafe { libc::raise(sig) };
}

fn write_stderr(bytes: &[u8]) {
    write_all_raw(libc::STDERR_FILENO, bytes);
}

fn write_all_raw(fd: RawFd, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is a live slice; write is async-signal-safe.
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n <= 0 {
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

/// Static name of a handled signal.
pub fn signal_name(sig: libc::c_int) -> &'static str {
    match sig {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGTERM => "SIGTERM",
        _ => "signal",
    }
}
