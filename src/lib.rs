//! extlink - host/extension IPC over anonymous pipes and SysV shared memory.
//!
//! An extension is a separate process started by a host with two inherited
//! pipe descriptors. Requests and replies travel as framed messages over
//! the pipes; pixel data travels through shared-memory segments the host
//! owns and the extension attaches.
//!
//! # Architecture
//!
//! - **Wire** - frame codec, typed messages, one-request-in-flight channel
//! - **Shm** - segment creation (host) and attachment (extension)
//! - **Session** - extension-side state: images, dialogs, callbacks
//! - **Host** - the peer that answers requests and drives dialogs
//! - **Crash** - fatal-signal handler with debugger backtrace capture
//!
//! # Modules
//!
//! - [`wire`] - Framing, protocol and channel
//! - [`session`] - Extension session and runner
//! - [`host`] - Host endpoint and extension spawning
//! - [`crash`] - Signal handling and backtrace capture
//! - [`config`] - Configuration loading

// Library modules
pub mod crash;
pub mod demo;
pub mod host;
pub mod session;
pub mod shm;
pub mod wire;

pub mod config;
pub mod env;
pub mod error;
pub mod launch;

// Re-export commonly used types
pub use config::{Config, StackTraceMode};
pub use error::{WireError, WireResult};
pub use host::{Host, HostExit};
pub use session::{run_extension, Launch, Session};
pub use wire::{Channel, Message, MessageKind};
