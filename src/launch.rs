//! Recognising a host launch from the command line.
//!
//! A host starts an extension with `--extlink <read_fd> <write_fd>` as the
//! last three arguments. Any other shape means the program was started by
//! hand and the protocol stays disabled.

use std::os::unix::io::RawFd;

/// Flag that precedes the two descriptor numbers.
pub const LAUNCH_FLAG: &str = "--extlink";

/// Inherited pipe descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchArgs {
    /// Host → extension pipe, read end.
    pub read_fd: RawFd,
    /// Extension → host pipe, write end.
    pub write_fd: RawFd,
}

impl LaunchArgs {
    /// Look for the launch flag at the end of `args` (program name
    /// included or not).
    pub fn detect<S: AsRef<str>>(args: &[S]) -> Option<Self> {
        let [.., flag, read, write] = args else {
            return None;
        };
        if flag.as_ref() != LAUNCH_FLAG {
            return None;
        }
        let read_fd = parse_fd(read.as_ref())?;
        let write_fd = parse_fd(write.as_ref())?;
        if read_fd == write_fd {
            return None;
        }
        Some(Self { read_fd, write_fd })
    }

    /// The three trailing arguments a host appends.
    pub fn to_args(self) -> [String; 3] {
        [
            LAUNCH_FLAG.to_string(),
            self.read_fd.to_string(),
            self.write_fd.to_string(),
        ]
    }
}

fn parse_fd(s: &str) -> Option<RawFd> {
    // u32 first so "-1" and "+3" are rejected.
    let n: u32 = s.parse().ok()?;
    RawFd::try_from(n).ok()
}
