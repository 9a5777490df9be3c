//! Starting an extension process wired to a fresh pipe pair.

use std::ffi::OsStr;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use anyhow::{Context, Result};

use crate::launch::LaunchArgs;
use crate::wire::pipe::{pipe, set_cloexec};
use crate::wire::Channel;

/// Spawn `program args... --extlink <read_fd> <write_fd>`.
///
/// Both pipes are close-on-exec in this process; only the child's copies
/// of its two ends lose the flag, so no other child inherits them.
///
/// # Errors
///
/// Pipe creation or spawn failure.
pub fn spawn_extension<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<(Child, Channel)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let (ext_read, host_write) = pipe().context("Failed to create host → extension pipe")?;
    let (host_read, ext_write) = pipe().context("Failed to create extension → host pipe")?;

    let launch = LaunchArgs {
        read_fd: ext_read.as_raw_fd(),
        write_fd: ext_write.as_raw_fd(),
    };

    let mut command = Command::new(program);
    command.args(args).args(launch.to_args());
    // SAFETY: the closure only calls fcntl, which is async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            set_cloexec(launch.read_fd, false)?;
            set_cloexec(launch.write_fd, false)
        });
    }
    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn extension {}", program.to_string_lossy()))?;
    log::info!(
        "[host] spawned {} (pid {}) on fds {}/{}",
        program.to_string_lossy(),
        child.id(),
        launch.read_fd,
        launch.write_fd
    );

    // Child-side ends are the child's now; keeping them would hide EOF.
    drop(ext_read);
    drop(ext_write);

    Ok((child, Channel::new(Box::new(host_read), Box::new(host_write))))
}
