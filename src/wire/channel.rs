//! Synchronous call convention over the frame codec.
//!
//! The wire format has no correlation id. Request/reply pairing holds only
//! because exactly one request is outstanding at a time and the host never
//! interleaves an unrelated frame between a request and its reply. The
//! [`Channel`] makes that an enforced invariant instead of caller
//! discipline:
//!
//! ```text
//! call(req) ──► awaiting = reply_kind(req) ──► write_frame ──► read_frame
//!                                                                │
//!                     kind == awaiting? ── no ──► UnexpectedReply (fatal)
//!                                         yes ──► awaiting = None, Ok(reply)
//! ```
//!
//! A failed call leaves `awaiting` set, so the channel refuses further
//! calls: once the ends disagree there is nothing left to salvage.

// Rust guideline compliant 2026-02

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};

use crate::error::{WireError, WireResult};

use super::framing::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use super::protocol::{Message, MessageKind};

/// One end of a host/extension pipe pair.
pub struct Channel {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    max_frame_size: u64,
    awaiting: Option<MessageKind>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("max_frame_size", &self.max_frame_size)
            .field("awaiting", &self.awaiting)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Build a channel from any byte streams.
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            reader,
            writer,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            awaiting: None,
        }
    }

    /// Take ownership of an inherited pipe pair.
    ///
    /// # Safety
    ///
    /// `read_fd` and `write_fd` must be open descriptors that nothing else
    /// in the process owns or will close.
    pub unsafe fn from_raw_fds(read_fd: RawFd, write_fd: RawFd) -> Self {
        // SAFETY: ownership guaranteed by the caller.
        let (reader, writer) = unsafe { (File::from_raw_fd(read_fd), File::from_raw_fd(write_fd)) };
        Self::new(Box::new(reader), Box::new(writer))
    }

    /// Override the payload size cap (default 16 MB).
    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Reply kind of the request in flight, if any.
    pub fn awaiting(&self) -> Option<MessageKind> {
        self.awaiting
    }

    /// Send one frame without waiting for anything.
    pub fn send(&mut self, msg: &Message) -> WireResult<()> {
        let kind = msg.kind();
        let payload = msg.encode_payload();
        log::trace!("[wire] send {kind:?} ({} bytes)", payload.len());
        write_frame(self.writer.as_mut(), kind.as_raw(), &payload)
    }

    /// Block until one full frame arrives and decode it.
    pub fn receive(&mut self) -> WireResult<Message> {
        let frame = read_frame(self.reader.as_mut(), self.max_frame_size)?;
        let msg = Message::decode(frame.kind, &frame.payload)?;
        log::trace!("[wire] recv {:?} ({} bytes)", msg.kind(), frame.payload.len());
        Ok(msg)
    }

    /// Send `request`, pump exactly one frame, and insist it is the reply.
    ///
    /// # Errors
    ///
    /// - [`WireError::ProtocolViolation`] if another call is still pending
    ///   or `request` has no reply kind.
    /// - [`WireError::UnexpectedReply`] if the frame that arrives is
    ///   anything other than the paired reply.
    /// - [`WireError::Terminated`] if the host sends TERMINATE instead.
    /// - Any codec error from sending or receiving.
    pub fn call(&mut self, request: &Message) -> WireResult<Message> {
        let expected = self.begin(request.kind())?;
        self.send(request)?;
        let reply = self.receive()?;
        if reply.kind() == MessageKind::Terminate {
            return Err(WireError::Terminated);
        }
        if reply.kind() != expected {
            return Err(WireError::UnexpectedReply {
                expected,
                received: reply.kind(),
            });
        }
        self.awaiting = None;
        Ok(reply)
    }

    fn begin(&mut self, kind: MessageKind) -> WireResult<MessageKind> {
        if let Some(pending) = self.awaiting {
            return Err(WireError::violation(format!(
                "{kind:?} issued while still awaiting {pending:?}"
            )));
        }
        let expected = kind
            .reply_kind()
            .ok_or_else(|| WireError::violation(format!("{kind:?} is not a request")))?;
        self.awaiting = Some(expected);
        Ok(expected)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────
