//! Process edge of an extension: launch detection, crash handlers, and the
//! guarantee that the host always hears QUIT.

use std::any::Any;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;

use super::{exit_with, Session};
use crate::config::Config;
use crate::crash;
use crate::env::Environment;
use crate::launch::LaunchArgs;
use crate::wire::Channel;

/// How [`run_extension`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// No launch arguments: the protocol stays off and `body` never ran.
    Standalone,
    /// `body` finished, every image was released and QUIT was sent.
    Finished,
}

/// Run `body` against a session on the pipes named in `args`.
///
/// Returns only on the orderly path. Any error or panic from `body`, or a
/// failed closing QUIT, ends the process after [`run_session`] cleaned up.
pub fn run_extension<F>(config: &Config, args: &[String], body: F) -> Launch
where
    F: FnOnce(&mut Session) -> Result<()>,
{
    let Some(launch) = LaunchArgs::detect(args) else {
        log::info!("[session] no launch arguments, protocol disabled");
        return Launch::Standalone;
    };
    log::info!(
        "[session] connected to host on fds {}/{}",
        launch.read_fd,
        launch.write_fd
    );

    install_crash_handlers(config, launch.write_fd);

    // SAFETY: the host opened these descriptors for us and nothing else in
    // this process refers to them.
    let channel = unsafe { Channel::from_raw_fds(launch.read_fd, launch.write_fd) }
        .with_max_frame_size(config.max_frame_size);
    if let Err(e) = run_session(Session::new(channel), body) {
        exit_with(&e);
    }
    Launch::Finished
}

/// Run `body`, then end the session in order.
///
/// A body that fails or panics still detaches every image and sends QUIT
/// before the error comes back.
///
/// # Errors
///
/// The body's error, a panic turned into an error, or a failed QUIT.
pub fn run_session<F>(mut session: Session, body: F) -> Result<()>
where
    F: FnOnce(&mut Session) -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| body(&mut session))) {
        Ok(Ok(())) => Ok(session.quit()?),
        Ok(Err(e)) => Err(session.abort(e)),
        Err(payload) => {
            let err = anyhow::anyhow!("extension panicked: {}", panic_message(payload.as_ref()));
            Err(session.abort(err))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string payload"
    }
}

fn install_crash_handlers(config: &Config, quit_fd: RawFd) {
    let env = Environment::current();
    if !env.installs_crash_handler() {
        log::debug!("[crash] skipped in {env} environment");
        return;
    }
    if let Err(e) = crash::install(config, Some(quit_fd)) {
        log::warn!("[crash] handlers not installed: {e:#}");
    }
}
