//! Message kinds and payload layouts for the extension wire protocol.
//!
//! Every frame carries a 4-byte kind. Extension-originated kinds sit in
//! `0x01..=0x07`; the host answer to extension kind `k` is always `k | 0x80`.
//! Host-initiated kinds without an extension counterpart start at `0x88`.
//!
//! | kind   | direction    | payload                                   |
//! |--------|--------------|-------------------------------------------|
//! | `0x01` | ext → host   | QUIT, empty (terminate notification)      |
//! | `0x02` | ext → host   | IMAGE_NEW `[w u32][h u32][kind u32][name]`|
//! | `0x03` | ext → host   | IMAGE_GET `[id u32][writable u8]`         |
//! | `0x04` | ext → host   | COLOR_QUERY `[which u32]`                 |
//! | `0x05` | ext → host   | PROGRESS `[fraction f64][label]`          |
//! | `0x06` | ext → host   | TEXT `[severity u32][text]`               |
//! | `0x07` | ext → host   | DIALOG `[op u32][fields…]`                |
//! | `0x81` | host → ext   | TERMINATE, empty                          |
//! | `0x82` | host → ext   | IMAGE_NEW_REPLY, image descriptor         |
//! | `0x83` | host → ext   | IMAGE_GET_REPLY, image descriptor         |
//! | `0x84` | host → ext   | COLOR_REPLY `[r f64][g f64][b f64][a f64]`|
//! | `0x85` | host → ext   | PROGRESS_ACK, empty                       |
//! | `0x86` | host → ext   | TEXT_ACK, empty                           |
//! | `0x87` | host → ext   | DIALOG_REPLY `[op u32][fields…]`          |
//! | `0x88` | host → ext   | DIALOG_EVENT `[dialog u32][item u32][blob]`|
//! | `0x89` | host → ext   | DIALOG_CLOSE `[dialog u32][result i32]`   |
//!
//! Strings are `[u32 len][UTF-8]`, blobs are `[u32 len][bytes]`. All
//! integers are native-endian: both ends are built from the same tree for
//! the same machine, so there is no byte-order negotiation.

// Rust guideline compliant 2026-02

use std::fmt;

use crate::error::{WireError, WireResult};

/// Bit that turns an extension kind into its host counterpart.
const HOST_BIT: u32 = 0x80;

// ─── Kinds ─────────────────────────────────────────────────────────────────

/// Closed set of frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    /// Extension is about to exit.
    Quit = 0x01,
    /// Allocate a new shared-memory image.
    ImageNew = 0x02,
    /// Attach to an existing image by id.
    ImageGet = 0x03,
    /// Ask for the host's current foreground or background color.
    ColorQuery = 0x04,
    /// Progress report.
    Progress = 0x05,
    /// Free-form message for the user.
    Text = 0x06,
    /// Remote dialog operation.
    Dialog = 0x07,
    /// Host asks the extension to shut down.
    Terminate = 0x01 | HOST_BIT,
    /// Reply to [`MessageKind::ImageNew`].
    ImageNewReply = 0x02 | HOST_BIT,
    /// Reply to [`MessageKind::ImageGet`].
    ImageGetReply = 0x03 | HOST_BIT,
    /// Reply to [`MessageKind::ColorQuery`].
    ColorReply = 0x04 | HOST_BIT,
    /// Reply to [`MessageKind::Progress`].
    ProgressAck = 0x05 | HOST_BIT,
    /// Reply to [`MessageKind::Text`].
    TextAck = 0x06 | HOST_BIT,
    /// Reply to [`MessageKind::Dialog`].
    DialogReply = 0x07 | HOST_BIT,
    /// Widget callback delivery.
    DialogEvent = 0x88,
    /// Host closed a dialog.
    DialogClose = 0x89,
}

impl MessageKind {
    /// Map a raw wire value to a kind. `None` means the peer is speaking
    /// a protocol we do not know.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let kind = match raw {
            0x01 => Self::Quit,
            0x02 => Self::ImageNew,
            0x03 => Self::ImageGet,
            0x04 => Self::ColorQuery,
            0x05 => Self::Progress,
            0x06 => Self::Text,
            0x07 => Self::Dialog,
            0x81 => Self::Terminate,
            0x82 => Self::ImageNewReply,
            0x83 => Self::ImageGetReply,
            0x84 => Self::ColorReply,
            0x85 => Self::ProgressAck,
            0x86 => Self::TextAck,
            0x87 => Self::DialogReply,
            0x88 => Self::DialogEvent,
            0x89 => Self::DialogClose,
            _ => return None,
        };
        Some(kind)
    }

    /// Raw wire value.
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Returns `true` for kinds the extension originates.
    pub fn is_extension_kind(self) -> bool {
        self.as_raw() & HOST_BIT == 0
    }

    /// The reply an extension request waits for, if any.
    ///
    /// QUIT is fire-and-forget; host kinds have no reply.
    pub fn reply_kind(self) -> Option<Self> {
        match self {
            Self::Quit => None,
            k if k.is_extension_kind() => Self::from_raw(k.as_raw() | HOST_BIT),
            _ => None,
        }
    }
}

// ─── Identifiers ───────────────────────────────────────────────────────────

/// Host-assigned dialog identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialogId(pub u32);

/// Host-assigned item identifier, unique within one dialog. `0` is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl ItemId {
    /// Parent id for top-level items.
    pub const ROOT: ItemId = ItemId(0);
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dialog#{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

// ─── Payload types ─────────────────────────────────────────────────────────

/// Pixel layout of a shared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Three 8-bit channels.
    Rgb,
    /// One 8-bit channel.
    Gray,
    /// One 8-bit palette index per pixel; palette in the colormap.
    Indexed,
}

impl ImageKind {
    /// Bytes per pixel.
    pub fn channels(self) -> u32 {
        match self {
            Self::Rgb => 3,
            Self::Gray | Self::Indexed => 1,
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            Self::Rgb => 0,
            Self::Gray => 1,
            Self::Indexed => 2,
        }
    }

    fn from_raw(raw: u32) -> WireResult<Self> {
        match raw {
            0 => Ok(Self::Rgb),
            1 => Ok(Self::Gray),
            2 => Ok(Self::Indexed),
            other => Err(WireError::violation(format!("unknown image kind {other}"))),
        }
    }
}

/// Inclusive-exclusive rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    /// Left edge.
    pub x0: i32,
    /// Top edge.
    pub y0: i32,
    /// Right edge (exclusive).
    pub x1: i32,
    /// Bottom edge (exclusive).
    pub y1: i32,
}

/// Everything the extension needs to attach and interpret an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    /// Pixel layout.
    pub kind: ImageKind,
    /// Host-side image id.
    pub id: u32,
    /// SysV shared-memory id, `-1` if the host has none to offer.
    pub shm_id: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per pixel.
    pub channels: u32,
    /// Region the extension should operate on.
    pub bounds: BoundingBox,
    /// Display name.
    pub name: String,
    /// Palette bytes (`r g b` triples) for indexed images, empty otherwise.
    pub colormap: Vec<u8>,
}

impl ImageDescriptor {
    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.u32(self.kind.to_raw());
        w.u32(self.id);
        w.i32(self.shm_id);
        w.u32(self.width);
        w.u32(self.height);
        w.u32(self.channels);
        w.i32(self.bounds.x0);
        w.i32(self.bounds.y0);
        w.i32(self.bounds.x1);
        w.i32(self.bounds.y1);
        w.string(&self.name);
        w.blob(&self.colormap);
    }

    fn decode_from(r: &mut PayloadReader<'_>) -> WireResult<Self> {
        Ok(Self {
            kind: ImageKind::from_raw(r.u32()?)?,
            id: r.u32()?,
            shm_id: r.i32()?,
            width: r.u32()?,
            height: r.u32()?,
            channels: r.u32()?,
            bounds: BoundingBox {
                x0: r.i32()?,
                y0: r.i32()?,
                x1: r.i32()?,
                y1: r.i32()?,
            },
            name: r.string()?,
            colormap: r.blob()?,
        })
    }
}

/// Parameters for a new image.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImageRequest {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub kind: ImageKind,
    /// Display name.
    pub name: String,
}

/// Which of the host's context colors to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTarget {
    /// Current foreground color.
    Foreground,
    /// Current background color.
    Background,
}

/// Linear RGBA in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Rgba {
    /// Red.
    pub r: f64,
    /// Green.
    pub g: f64,
    /// Blue.
    pub b: f64,
    /// Alpha.
    pub a: f64,
}

/// How loudly the host should present a TEXT message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something went wrong but the extension continues.
    Warning,
    /// The extension failed.
    Error,
}

impl Severity {
    fn to_raw(self) -> u32 {
        match self {
            Self::Info => 0,
            Self::Warning => 1,
            Self::Error => 2,
        }
    }

    fn from_raw(raw: u32) -> WireResult<Self> {
        match raw {
            0 => Ok(Self::Info),
            1 => Ok(Self::Warning),
            2 => Ok(Self::Error),
            other => Err(WireError::violation(format!("unknown severity {other}"))),
        }
    }
}

/// Widget type of a dialog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Container for child items.
    Group,
    /// Static text.
    Label,
    /// Push button.
    Button,
    /// Check box.
    Toggle,
    /// Numeric slider.
    Slider,
    /// Text entry.
    Entry,
    /// Color picker button.
    ColorButton,
}

impl ItemKind {
    fn to_raw(self) -> u32 {
        match self {
            Self::Group => 0,
            Self::Label => 1,
            Self::Button => 2,
            Self::Toggle => 3,
            Self::Slider => 4,
            Self::Entry => 5,
            Self::ColorButton => 6,
        }
    }

    fn from_raw(raw: u32) -> WireResult<Self> {
        Ok(match raw {
            0 => Self::Group,
            1 => Self::Label,
            2 => Self::Button,
            3 => Self::Toggle,
            4 => Self::Slider,
            5 => Self::Entry,
            6 => Self::ColorButton,
            other => return Err(WireError::violation(format!("unknown item kind {other}"))),
        })
    }
}

/// Dialog operation sent by the extension inside a DIALOG frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogRequest {
    /// Create an empty dialog.
    New {
        /// Window title.
        title: String,
    },
    /// Add a widget.
    NewItem {
        /// Owning dialog.
        dialog: DialogId,
        /// Parent item, [`ItemId::ROOT`] for top level.
        parent: ItemId,
        /// Widget type.
        kind: ItemKind,
        /// Caption.
        label: String,
    },
    /// Display the dialog modally.
    Show {
        /// Dialog to show.
        dialog: DialogId,
    },
    /// Destroy the dialog.
    Delete {
        /// Dialog to destroy.
        dialog: DialogId,
    },
    /// Push a widget value to the host.
    SetValue {
        /// Owning dialog.
        dialog: DialogId,
        /// Target item.
        item: ItemId,
        /// Opaque value bytes.
        value: Vec<u8>,
    },
}

impl DialogRequest {
    fn tag(&self) -> u32 {
        match self {
            Self::New { .. } => 0,
            Self::NewItem { .. } => 1,
            Self::Show { .. } => 2,
            Self::Delete { .. } => 3,
            Self::SetValue { .. } => 4,
        }
    }
}

/// Host answer inside a DIALOG_REPLY frame. Tag `n` answers request tag `n`.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogReply {
    /// Answer to [`DialogRequest::New`].
    Created {
        /// Newly assigned id.
        dialog: DialogId,
    },
    /// Answer to [`DialogRequest::NewItem`].
    ItemCreated {
        /// Owning dialog.
        dialog: DialogId,
        /// Newly assigned item id.
        item: ItemId,
    },
    /// Answer to [`DialogRequest::Show`]; the dialog is now on screen.
    Shown {
        /// Dialog now displayed.
        dialog: DialogId,
    },
    /// Answer to [`DialogRequest::Delete`].
    Deleted {
        /// Destroyed dialog.
        dialog: DialogId,
    },
    /// Answer to [`DialogRequest::SetValue`].
    ValueSet {
        /// Owning dialog.
        dialog: DialogId,
        /// Updated item.
        item: ItemId,
    },
}

impl DialogReply {
    /// Union tag; must equal the tag of the request it answers.
    pub fn tag(&self) -> u32 {
        match self {
            Self::Created { .. } => 0,
            Self::ItemCreated { .. } => 1,
            Self::Shown { .. } => 2,
            Self::Deleted { .. } => 3,
            Self::ValueSet { .. } => 4,
        }
    }

    /// Returns `true` if this reply is the answer shape for `request`.
    pub fn answers(&self, request: &DialogRequest) -> bool {
        self.tag() == request.tag()
    }
}

// ─── Messages ──────────────────────────────────────────────────────────────

/// A decoded frame. One variant per [`MessageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Extension terminate notification.
    Quit,
    /// New image request.
    ImageNew(NewImageRequest),
    /// Existing image request.
    ImageGet {
        /// Host image id.
        id: u32,
        /// Output image (read-write) vs input image (read-only).
        writable: bool,
    },
    /// Color query.
    ColorQuery(ColorTarget),
    /// Progress report.
    Progress {
        /// Completion in `0.0..=1.0`.
        fraction: f64,
        /// Status text.
        label: String,
    },
    /// User-facing message.
    Text {
        /// Presentation level.
        severity: Severity,
        /// Message body.
        text: String,
    },
    /// Dialog operation.
    Dialog(DialogRequest),
    /// Host asks the extension to shut down.
    Terminate,
    /// Descriptor of a freshly allocated image.
    ImageNewReply(ImageDescriptor),
    /// Descriptor of an existing image.
    ImageGetReply(ImageDescriptor),
    /// Color query answer.
    ColorReply(Rgba),
    /// Progress acknowledgment.
    ProgressAck,
    /// Text acknowledgment.
    TextAck,
    /// Dialog operation answer.
    DialogReply(DialogReply),
    /// Widget callback delivery.
    DialogEvent {
        /// Dialog owning the widget.
        dialog: DialogId,
        /// Widget that fired.
        item: ItemId,
        /// Opaque callback data.
        data: Vec<u8>,
    },
    /// Host closed a dialog.
    DialogClose {
        /// Closed dialog.
        dialog: DialogId,
        /// Result code (button index, `0` = accepted by convention).
        result: i32,
    },
}

impl Message {
    /// Frame kind for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Quit => MessageKind::Quit,
            Self::ImageNew(_) => MessageKind::ImageNew,
            Self::ImageGet { .. } => MessageKind::ImageGet,
            Self::ColorQuery(_) => MessageKind::ColorQuery,
            Self::Progress { .. } => MessageKind::Progress,
            Self::Text { .. } => MessageKind::Text,
            Self::Dialog(_) => MessageKind::Dialog,
            Self::Terminate => MessageKind::Terminate,
            Self::ImageNewReply(_) => MessageKind::ImageNewReply,
            Self::ImageGetReply(_) => MessageKind::ImageGetReply,
            Self::ColorReply(_) => MessageKind::ColorReply,
            Self::ProgressAck => MessageKind::ProgressAck,
            Self::TextAck => MessageKind::TextAck,
            Self::DialogReply(_) => MessageKind::DialogReply,
            Self::DialogEvent { .. } => MessageKind::DialogEvent,
            Self::DialogClose { .. } => MessageKind::DialogClose,
        }
    }

    /// Serialize the payload (without header).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = PayloadWriter::default();
        match self {
            Self::Quit
            | Self::Terminate
            | Self::ProgressAck
            | Self::TextAck => {}
            Self::ImageNew(req) => {
                w.u32(req.width);
                w.u32(req.height);
                w.u32(req.kind.to_raw());
                w.string(&req.name);
            }
            Self::ImageGet { id, writable } => {
                w.u32(*id);
                w.u8(u8::from(*writable));
            }
            Self::ColorQuery(target) => w.u32(match target {
                ColorTarget::Foreground => 0,
                ColorTarget::Background => 1,
            }),
            Self::Progress { fraction, label } => {
                w.f64(*fraction);
                w.string(label);
            }
            Self::Text { severity, text } => {
                w.u32(severity.to_raw());
                w.string(text);
            }
            Self::Dialog(req) => {
                w.u32(req.tag());
                match req {
                    DialogRequest::New { title } => w.string(title),
                    DialogRequest::NewItem { dialog, parent, kind, label } => {
                        w.u32(dialog.0);
                        w.u32(parent.0);
                        w.u32(kind.to_raw());
                        w.string(label);
                    }
                    DialogRequest::Show { dialog } | DialogRequest::Delete { dialog } => {
                        w.u32(dialog.0);
                    }
                    DialogRequest::SetValue { dialog, item, value } => {
                        w.u32(dialog.0);
                        w.u32(item.0);
                        w.blob(value);
                    }
                }
            }
            Self::ImageNewReply(desc) | Self::ImageGetReply(desc) => desc.encode_into(&mut w),
            Self::ColorReply(c) => {
                w.f64(c.r);
                w.f64(c.g);
                w.f64(c.b);
                w.f64(c.a);
            }
            Self::DialogReply(reply) => {
                w.u32(reply.tag());
                match reply {
                    DialogReply::Created { dialog }
                    | DialogReply::Shown { dialog }
                    | DialogReply::Deleted { dialog } => w.u32(dialog.0),
                    DialogReply::ItemCreated { dialog, item }
                    | DialogReply::ValueSet { dialog, item } => {
                        w.u32(dialog.0);
                        w.u32(item.0);
                    }
                }
            }
            Self::DialogEvent { dialog, item, data } => {
                w.u32(dialog.0);
                w.u32(item.0);
                w.blob(data);
            }
            Self::DialogClose { dialog, result } => {
                w.u32(dialog.0);
                w.i32(*result);
            }
        }
        w.into_inner()
    }

    /// Decode a payload of the given raw kind.
    ///
    /// This is the dispatch point for incoming frames: an unknown kind, a
    /// short payload, or trailing bytes are all protocol violations.
    pub fn decode(raw_kind: u32, payload: &[u8]) -> WireResult<Self> {
        let kind = MessageKind::from_raw(raw_kind)
            .ok_or_else(|| WireError::violation(format!("unknown message kind 0x{raw_kind:02x}")))?;
        let mut r = PayloadReader::new(payload);
        let msg = match kind {
            MessageKind::Quit => Self::Quit,
            MessageKind::Terminate => Self::Terminate,
            MessageKind::ProgressAck => Self::ProgressAck,
            MessageKind::TextAck => Self::TextAck,
            MessageKind::ImageNew => Self::ImageNew(NewImageRequest {
                width: r.u32()?,
                height: r.u32()?,
                kind: ImageKind::from_raw(r.u32()?)?,
                name: r.string()?,
            }),
            MessageKind::ImageGet => Self::ImageGet {
                id: r.u32()?,
                writable: r.u8()? != 0,
            },
            MessageKind::ColorQuery => Self::ColorQuery(match r.u32()? {
                0 => ColorTarget::Foreground,
                1 => ColorTarget::Background,
                other => return Err(WireError::violation(format!("unknown color target {other}"))),
            }),
            MessageKind::Progress => Self::Progress {
                fraction: r.f64()?,
                label: r.string()?,
            },
            MessageKind::Text => Self::Text {
                severity: Severity::from_raw(r.u32()?)?,
                text: r.string()?,
            },
            MessageKind::Dialog => Self::Dialog(match r.u32()? {
                0 => DialogRequest::New { title: r.string()? },
                1 => DialogRequest::NewItem {
                    dialog: DialogId(r.u32()?),
                    parent: ItemId(r.u32()?),
                    kind: ItemKind::from_raw(r.u32()?)?,
                    label: r.string()?,
                },
                2 => DialogRequest::Show { dialog: DialogId(r.u32()?) },
                3 => DialogRequest::Delete { dialog: DialogId(r.u32()?) },
                4 => DialogRequest::SetValue {
                    dialog: DialogId(r.u32()?),
                    item: ItemId(r.u32()?),
                    value: r.blob()?,
                },
                tag => return Err(WireError::violation(format!("unknown dialog op {tag}"))),
            }),
            MessageKind::ImageNewReply => Self::ImageNewReply(ImageDescriptor::decode_from(&mut r)?),
            MessageKind::ImageGetReply => Self::ImageGetReply(ImageDescriptor::decode_from(&mut r)?),
            MessageKind::ColorReply => Self::ColorReply(Rgba {
                r: r.f64()?,
                g: r.f64()?,
                b: r.f64()?,
                a: r.f64()?,
            }),
            MessageKind::DialogReply => Self::DialogReply(match r.u32()? {
                0 => DialogReply::Created { dialog: DialogId(r.u32()?) },
                1 => DialogReply::ItemCreated {
                    dialog: DialogId(r.u32()?),
                    item: ItemId(r.u32()?),
                },
                2 => DialogReply::Shown { dialog: DialogId(r.u32()?) },
                3 => DialogReply::Deleted { dialog: DialogId(r.u32()?) },
                4 => DialogReply::ValueSet {
                    dialog: DialogId(r.u32()?),
                    item: ItemId(r.u32()?),
                },
                tag => return Err(WireError::violation(format!("unknown dialog reply {tag}"))),
            }),
            MessageKind::DialogEvent => Self::DialogEvent {
                dialog: DialogId(r.u32()?),
                item: ItemId(r.u32()?),
                data: r.blob()?,
            },
            MessageKind::DialogClose => Self::DialogClose {
                dialog: DialogId(r.u32()?),
                result: r.i32()?,
            },
        };
        r.finish(kind)?;
        Ok(msg)
    }
}

// ─── Payload primitives ────────────────────────────────────────────────────

#[derive(Default)]
struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn blob(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    fn string(&mut self, s: &str) {
        self.blob(s.as_bytes());
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let end = self.off.checked_add(n).filter(|&end| end <= self.buf.len()).ok_or_else(|| {
            WireError::violation(format!(
                "payload too short: need {n} bytes at offset {}, have {}",
                self.off,
                self.buf.len()
            ))
        })?;
        let slice = &self.buf[self.off..end];
        self.off = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> WireResult<u32> {
        Ok(u32::from_ne_bytes(self.array()?))
    }

    fn i32(&mut self) -> WireResult<i32> {
        Ok(i32::from_ne_bytes(self.array()?))
    }

    fn f64(&mut self) -> WireResult<f64> {
        Ok(f64::from_ne_bytes(self.array()?))
    }

    fn blob(&mut self) -> WireResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> WireResult<String> {
        let bytes = self.blob()?;
        String::from_utf8(bytes).map_err(|e| WireError::violation(format!("string is not UTF-8: {e}")))
    }

    fn finish(&self, kind: MessageKind) -> WireResult<()> {
        if self.off == self.buf.len() {
            Ok(())
        } else {
            Err(WireError::violation(format!(
                "{kind:?} payload has {} trailing bytes",
                self.buf.len() - self.off
            )))
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &Message) -> Message {
        let payload = msg.encode_payload();
        Message::decode(msg.kind().as_raw(), &payload).unwrap()
    }

    #[test]
    fn reply_kind_is_host_counterpart() {
        assert_eq!(MessageKind::ImageNew.reply_kind(), Some(MessageKind::ImageNewReply));
        assert_eq!(MessageKind::Dialog.reply_kind(), Some(MessageKind::DialogReply));
        assert_eq!(MessageKind::Quit.reply_kind(), None);
        assert_eq!(MessageKind::DialogClose.reply_kind(), None);
        for raw in 0x02..=0x07u32 {
            let kind = MessageKind::from_raw(raw).unwrap();
            assert_eq!(kind.reply_kind().unwrap().as_raw(), raw | 0x80);
        }
    }

    #[test]
    fn descriptor_with_colormap_survives() {
        let desc = ImageDescriptor {
            kind: ImageKind::Indexed,
            id: 9,
            shm_id: 1234,
            width: 16,
            height: 8,
            channels: 1,
            bounds: BoundingBox { x0: 2, y0: 1, x1: 10, y1: 7 },
            name: "palette".into(),
            colormap: vec![255, 0, 0, 0, 255, 0],
        };
        let msg = Message::ImageGetReply(desc.clone());
        assert_eq!(round_trip(&msg), msg);
        assert_eq!(desc.byte_len(), 128);
    }

    #[test]
    fn dialog_union_survives() {
        let msgs = [
            Message::Dialog(DialogRequest::NewItem {
                dialog: DialogId(3),
                parent: ItemId::ROOT,
                kind: ItemKind::Slider,
                label: "Radius".into(),
            }),
            Message::Dialog(DialogRequest::SetValue {
                dialog: DialogId(3),
                item: ItemId(2),
                value: vec![1, 2, 3],
            }),
            Message::DialogReply(DialogReply::ItemCreated { dialog: DialogId(3), item: ItemId(4) }),
            Message::DialogEvent { dialog: DialogId(1), item: ItemId(2), data: vec![] },
            Message::DialogClose { dialog: DialogId(1), result: -1 },
        ];
        for msg in &msgs {
            assert_eq!(&round_trip(msg), msg);
        }
    }

    #[test]
    fn every_kind_survives() {
        let msgs = [
            Message::Quit,
            Message::Terminate,
            Message::ProgressAck,
            Message::TextAck,
            Message::ImageNew(NewImageRequest {
                width: 100,
                height: 50,
                kind: ImageKind::Rgb,
                name: "layer".into(),
            }),
            Message::ImageGet { id: 4, writable: false },
            Message::ColorQuery(ColorTarget::Foreground),
            Message::ColorQuery(ColorTarget::Background),
            Message::Progress { fraction: 0.25, label: "quarter".into() },
            Message::Text { severity: Severity::Warning, text: "ünïcode".into() },
            Message::ColorReply(Rgba { r: 0.5, g: 0.0, b: 1.0, a: 1.0 }),
            Message::ImageNewReply(ImageDescriptor {
                kind: ImageKind::Gray,
                id: 1,
                shm_id: 77,
                width: 3,
                height: 2,
                channels: 1,
                bounds: BoundingBox { x0: 0, y0: 0, x1: 3, y1: 2 },
                name: String::new(),
                colormap: Vec::new(),
            }),
            Message::Dialog(DialogRequest::New { title: "Options".into() }),
            Message::Dialog(DialogRequest::Show { dialog: DialogId(2) }),
            Message::Dialog(DialogRequest::Delete { dialog: DialogId(2) }),
            Message::DialogReply(DialogReply::Created { dialog: DialogId(2) }),
            Message::DialogReply(DialogReply::Shown { dialog: DialogId(2) }),
            Message::DialogReply(DialogReply::Deleted { dialog: DialogId(2) }),
            Message::DialogReply(DialogReply::ValueSet { dialog: DialogId(2), item: ItemId(1) }),
        ];
        for msg in &msgs {
            assert_eq!(&round_trip(msg), msg);
        }
    }

    #[test]
    fn unknown_kind_is_violation() {
        let err = Message::decode(0x42, &[]).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn short_payload_is_violation() {
        let payload = Message::ImageGet { id: 7, writable: true }.encode_payload();
        let err = Message::decode(MessageKind::ImageGet.as_raw(), &payload[..3]).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn trailing_bytes_are_violation() {
        let err = Message::decode(MessageKind::TextAck.as_raw(), &[0]).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn reply_tag_must_match_request() {
        let req = DialogRequest::Show { dialog: DialogId(1) };
        assert!(DialogReply::Shown { dialog: DialogId(1) }.answers(&req));
        assert!(!DialogReply::Deleted { dialog: DialogId(1) }.answers(&req));
    }
}
