//! Host/extension wire layer.
//!
//! - [`framing`]: header + payload codec over a byte stream.
//! - [`protocol`]: message kinds, typed messages, payload layouts.
//! - [`channel`]: one-request-in-flight call convention.
//! - [`pipe`]: anonymous pipe plumbing.

pub mod channel;
pub mod framing;
pub mod pipe;
pub mod protocol;

pub use channel::Channel;
pub use protocol::{
    BoundingBox, ColorTarget, DialogId, DialogReply, DialogRequest, ImageDescriptor, ImageKind,
    ItemId, ItemKind, Message, MessageKind, NewImageRequest, Rgba, Severity,
};
