//! Anonymous pipe helpers.

use std::fs::File;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};

use super::channel::Channel;

/// Create a close-on-exec pipe. Returns `(read_end, write_end)`.
pub fn pipe() -> io::Result<(File, File)> {
    let mut fds: [RawFd; 2] = [0; 2];
    // SAFETY: `pipe` writes exactly two valid FDs into `fds` on success.
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both FDs were just created and are owned by nobody else.
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    set_cloexec(fds[0], true)?;
    set_cloexec(fds[1], true)?;
    Ok((read, write))
}

/// Set or clear `FD_CLOEXEC` on `fd`.
pub fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied FD; failure is reported via errno.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if on {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Two channels joined back to back by a pair of pipes.
///
/// Whatever one side sends the other receives. Used to run a host and an
/// extension session inside one process.
pub fn channel_pair() -> io::Result<(Channel, Channel)> {
    let (a_read, b_write) = pipe()?;
    let (b_read, a_write) = pipe()?;
    Ok((
        Channel::new(Box::new(a_read), Box::new(a_write)),
        Channel::new(Box::new(b_read), Box::new(b_write)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn pipe_carries_bytes_and_is_cloexec() {
        let (mut r, mut w) = pipe().unwrap();
        w.write_all(b"ping").unwrap();
        drop(w);
        let mut got = Vec::new();
        r.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"ping");

        // SAFETY: querying flags of an FD we own.
        let flags = unsafe { libc::fcntl(r.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }
}
