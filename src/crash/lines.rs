//! Picks backtrace frames out of raw debugger output.
//!
//! The debugger prints banners, prompts and thread listings around the
//! frames we want. Frames are the lines that start with `#`, so the
//! assembler stays idle until a line opens with the marker and captures
//! up to the next newline.

/// First byte of a backtrace frame line.
pub const FRAME_MARKER: u8 = b'#';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the first byte of a line.
    LineStart,
    /// Inside a frame line.
    Capturing,
    /// Inside a line we don't want.
    Skipping,
}

/// Byte-at-a-time line assembler.
#[derive(Debug)]
pub struct LineAssembler {
    state: State,
    line: Vec<u8>,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    /// Idle assembler, positioned at the start of a line.
    pub fn new() -> Self {
        Self {
            state: State::LineStart,
            line: Vec::with_capacity(256),
        }
    }

    /// Feed one byte. Returns a completed frame line (without the newline).
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match (self.state, byte) {
            (_, b'\n') => {
                let was = std::mem::replace(&mut self.state, State::LineStart);
                (was == State::Capturing).then(|| self.take())
            }
            (State::LineStart, FRAME_MARKER) => {
                self.state = State::Capturing;
                self.line.push(byte);
                None
            }
            (State::LineStart, _) => {
                self.state = State::Skipping;
                None
            }
            (State::Capturing, b'\r') => None,
            (State::Capturing, _) => {
                self.line.push(byte);
                None
            }
            (State::Skipping, _) => None,
        }
    }

    /// End of input. A frame cut off before its newline is still returned.
    pub fn finish(mut self) -> Option<String> {
        (self.state == State::Capturing).then(|| self.take())
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        line
    }
}

/// Run a whole byte sequence through a fresh [`LineAssembler`].
pub fn assemble_lines(bytes: &[u8]) -> Vec<String> {
    let mut assembler = LineAssembler::new();
    let mut lines: Vec<String> = bytes.iter().filter_map(|&b| assembler.push(b)).collect();
    lines.extend(assembler.finish());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_frame_lines() {
        let out = b"Attaching to process 42\n\
                    Reading symbols...\n\
                    #0  0x00007f in raise () from libc.so.6\n\
                    #1  0x000055 in main () at demo.rs:10\n\
                    (gdb) Detaching\n";
        assert_eq!(
            assemble_lines(out),
            vec![
                "#0  0x00007f in raise () from libc.so.6",
                "#1  0x000055 in main () at demo.rs:10",
            ]
        );
    }

    #[test]
    fn marker_must_open_the_line() {
        assert!(assemble_lines(b"frame #0 here\n  #1 indented\n").is_empty());
    }

    #[test]
    fn truncated_frame_is_flushed() {
        assert_eq!(assemble_lines(b"junk\n#3 partial"), vec!["#3 partial"]);
    }

    #[test]
    fn blank_lines_and_crlf() {
        assert_eq!(assemble_lines(b"\n\n#0 a\r\n\n#1 b\n"), vec!["#0 a", "#1 b"]);
    }

    #[test]
    fn empty_input() {
        assert!(assemble_lines(b"").is_empty());
        assert_eq!(LineAssembler::new().push(b'#'), None);
    }
}
