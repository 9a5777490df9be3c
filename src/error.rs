//! Error taxonomy for the extension wire protocol.
//!
//! Every variant is unrecoverable for the current connection: nothing in
//! this crate retries. The split exists so the process edge can decide how
//! to die (see [`crate::session::Session::fatal`]) and so tests can assert
//! on the kind of failure rather than on message text.

// Rust guideline compliant 2026-02

use std::io;

use crate::wire::protocol::{DialogId, MessageKind};

/// Result alias used throughout the protocol core.
pub type WireResult<T> = std::result::Result<T, WireError>;

/// Failure raised by the frame codec, the call convention, shared memory,
/// or the session state machine.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The peer sent something the protocol does not allow at this point:
    /// unknown kind, oversized frame, malformed payload, out-of-order ids.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A synchronous call received a reply of the wrong kind.
    #[error("protocol violation: expected {expected:?}, received {received:?}")]
    UnexpectedReply {
        /// Reply kind the outstanding request is waiting for.
        expected: MessageKind,
        /// Kind that actually arrived.
        received: MessageKind,
    },

    /// The peer closed its end of the pipe mid-frame or between frames.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Read or write on the protocol pipes failed.
    #[error("transport failure: {context}: {source}")]
    Transport {
        /// What the codec was doing.
        context: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Creating, attaching or detaching a shared-memory segment failed.
    #[error("shared memory: {context}: {source}")]
    SharedMemory {
        /// Segment operation and id.
        context: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The caller referred to a dialog this session does not hold.
    #[error("unknown {0}")]
    UnknownDialog(DialogId),

    /// The host asked the extension to terminate.
    #[error("host requested termination")]
    Terminated,
}

impl WireError {
    /// Shorthand for a [`WireError::ProtocolViolation`] from anything printable.
    pub fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Wrap an I/O error from the protocol pipes.
    pub fn transport(context: &'static str, source: io::Error) -> Self {
        Self::Transport { context, source }
    }

    /// Returns `true` for the desync family: the two ends no longer agree
    /// on what the next frame should be.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::UnexpectedReply { .. })
    }

    /// Returns `true` when the host ended the session on purpose.
    pub fn is_orderly(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}
