//! Host endpoint: serves one extension over a [`Channel`].
//!
//! The host owns every shared-memory segment. It answers each request
//! with its paired reply and never sends anything unsolicited except
//! while a dialog is shown (events, then CLOSE) and TERMINATE.
//!
//! ```text
//! serve() ─► receive ─► QUIT?  ──► HostExit::Quit
//!               │       EOF?   ──► HostExit::Disconnected
//!               └─► handle ─► reply (+ events/CLOSE after SHOW) ─┐
//!                     ▲                                          │
//!                     └──────────────────────────────────────────┘
//! ```

// Rust guideline compliant 2026-02

pub mod driver;
pub mod spawn;

use std::collections::HashMap;

use crate::config::Config;
use crate::error::{WireError, WireResult};
use crate::shm::{Access, Attachment, SharedSegment};
use crate::wire::{
    BoundingBox, Channel, ColorTarget, DialogId, DialogReply, DialogRequest, ImageDescriptor,
    ImageKind, ItemId, ItemKind, Message, NewImageRequest, Rgba, Severity,
};

pub use driver::{AutoAcceptDriver, DialogDriver, DialogScript, ScriptedDriver, ScriptedEvent};
pub use spawn::spawn_extension;

/// Why [`Host::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// The extension sent QUIT.
    Quit,
    /// The extension closed its pipe without QUIT.
    Disconnected,
}

/// One image owned by the host.
#[derive(Debug)]
struct HostImage {
    descriptor: ImageDescriptor,
    segment: SharedSegment,
}

/// Host-side model of one widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostItem {
    /// Assigned id, starting at 1 per dialog.
    pub id: ItemId,
    /// Parent item or [`ItemId::ROOT`].
    pub parent: ItemId,
    /// Widget type.
    pub kind: ItemKind,
    /// Caption.
    pub label: String,
    /// Last value pushed by the extension.
    pub value: Vec<u8>,
}

/// Host-side model of one dialog.
#[derive(Debug, Clone)]
pub struct HostDialog {
    /// Assigned id.
    pub id: DialogId,
    /// Window title.
    pub title: String,
    /// Widgets in creation order.
    pub items: Vec<HostItem>,
    next_item: u32,
}

impl HostDialog {
    pub(crate) fn new(id: DialogId, title: String) -> Self {
        Self {
            id,
            title,
            items: Vec::new(),
            next_item: 0,
        }
    }

    fn item_mut(&mut self, item: ItemId) -> Option<&mut HostItem> {
        self.items.iter_mut().find(|i| i.id == item)
    }
}

/// The host end of one extension connection.
pub struct Host {
    channel: Channel,
    driver: Box<dyn DialogDriver>,
    images: HashMap<u32, HostImage>,
    next_image: u32,
    dialogs: HashMap<DialogId, HostDialog>,
    next_dialog: u32,
    foreground: Rgba,
    background: Rgba,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("channel", &self.channel)
            .field("images", &self.images.len())
            .field("dialogs", &self.dialogs.len())
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Serve `channel`, running shown dialogs through `driver`.
    pub fn new(channel: Channel, driver: impl DialogDriver + 'static) -> Self {
        let defaults = Config::default();
        Self {
            channel,
            driver: Box::new(driver),
            images: HashMap::new(),
            next_image: 0,
            dialogs: HashMap::new(),
            next_dialog: 0,
            foreground: defaults.foreground,
            background: defaults.background,
        }
    }

    /// Take frame limit and palette from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.channel = self.channel.with_max_frame_size(config.max_frame_size);
        self.foreground = config.foreground;
        self.background = config.background;
        self
    }

    /// Preload an image the extension can fetch with IMAGE_GET.
    ///
    /// # Errors
    ///
    /// Wrong pixel length, or a shared-memory failure.
    pub fn add_image(
        &mut self,
        width: u32,
        height: u32,
        kind: ImageKind,
        name: &str,
        pixels: &[u8],
    ) -> WireResult<u32> {
        let id = self.allocate_image(NewImageRequest {
            width,
            height,
            kind,
            name: name.to_owned(),
        })?;
        let image = &self.images[&id];
        if pixels.len() != image.descriptor.byte_len() {
            return Err(WireError::violation(format!(
                "{} pixel bytes for a {}-byte image",
                pixels.len(),
                image.descriptor.byte_len()
            )));
        }
        let mut view = Attachment::attach(image.segment.id(), pixels.len(), Access::ReadWrite)?;
        if let Some(dst) = view.as_mut_slice() {
            dst.copy_from_slice(pixels);
        }
        view.detach()?;
        Ok(id)
    }

    /// Copy out the current pixels of image `id`.
    pub fn image_pixels(&self, id: u32) -> WireResult<Option<Vec<u8>>> {
        let Some(image) = self.images.get(&id) else {
            return Ok(None);
        };
        let view = Attachment::attach(image.segment.id(), image.descriptor.byte_len(), Access::ReadOnly)?;
        let pixels = view.as_slice().to_vec();
        view.detach()?;
        Ok(Some(pixels))
    }

    /// Descriptor of image `id`.
    pub fn image_descriptor(&self, id: u32) -> Option<&ImageDescriptor> {
        self.images.get(&id).map(|i| &i.descriptor)
    }

    /// Host-side model of a dialog.
    pub fn dialog(&self, id: DialogId) -> Option<&HostDialog> {
        self.dialogs.get(&id)
    }

    /// Ask the extension to shut down.
    pub fn terminate(&mut self) -> WireResult<()> {
        log::info!("[host] sending TERMINATE");
        self.channel.send(&Message::Terminate)
    }

    /// Answer requests until the extension quits or hangs up.
    ///
    /// # Errors
    ///
    /// Transport failures, or a frame the extension should never send.
    pub fn serve(&mut self) -> WireResult<HostExit> {
        loop {
            let msg = match self.channel.receive() {
                Ok(msg) => msg,
                Err(WireError::PeerClosed) => {
                    log::warn!("[host] extension hung up without QUIT");
                    return Ok(HostExit::Disconnected);
                }
                Err(e) => return Err(e),
            };
            if msg == Message::Quit {
                log::info!("[host] extension sent QUIT");
                return Ok(HostExit::Quit);
            }
            self.handle(msg)?;
        }
    }

    fn handle(&mut self, msg: Message) -> WireResult<()> {
        let reply = match msg {
            Message::ImageNew(request) => {
                let id = self.allocate_image(request)?;
                Message::ImageNewReply(self.images[&id].descriptor.clone())
            }
            Message::ImageGet { id, writable } => {
                log::debug!("[host] IMAGE_GET {id} (writable: {writable})");
                Message::ImageGetReply(self.lookup_descriptor(id))
            }
            Message::ColorQuery(target) => Message::ColorReply(match target {
                ColorTarget::Foreground => self.foreground,
                ColorTarget::Background => self.background,
            }),
            Message::Progress { fraction, label } => {
                log::info!("[host] progress {:>3.0}% {label}", fraction * 100.0);
                Message::ProgressAck
            }
            Message::Text { severity, text } => {
                match severity {
                    Severity::Info => log::info!("[host] extension: {text}"),
                    Severity::Warning => log::warn!("[host] extension: {text}"),
                    Severity::Error => log::error!("[host] extension: {text}"),
                }
                Message::TextAck
            }
            Message::Dialog(request) => return self.handle_dialog(request),
            other => {
                return Err(WireError::violation(format!(
                    "extension sent host-side {:?}",
                    other.kind()
                )))
            }
        };
        self.channel.send(&reply)
    }

    fn handle_dialog(&mut self, request: DialogRequest) -> WireResult<()> {
        let reply = match request {
            DialogRequest::New { title } => {
                self.next_dialog += 1;
                let id = DialogId(self.next_dialog);
                log::debug!("[host] NEW {id} \"{title}\"");
                self.dialogs.insert(id, HostDialog::new(id, title));
                DialogReply::Created { dialog: id }
            }
            DialogRequest::NewItem {
                dialog,
                parent,
                kind,
                label,
            } => {
                let model = self.dialog_mut(dialog)?;
                if parent != ItemId::ROOT && !model.items.iter().any(|i| i.id == parent) {
                    return Err(WireError::violation(format!("{dialog} has no {parent}")));
                }
                model.next_item += 1;
                let item = ItemId(model.next_item);
                model.items.push(HostItem {
                    id: item,
                    parent,
                    kind,
                    label,
                    value: Vec::new(),
                });
                DialogReply::ItemCreated { dialog, item }
            }
            DialogRequest::SetValue { dialog, item, value } => {
                let model = self.dialog_mut(dialog)?;
                let slot = model
                    .item_mut(item)
                    .ok_or_else(|| WireError::violation(format!("{dialog} has no {item}")))?;
                slot.value = value;
                DialogReply::ValueSet { dialog, item }
            }
            DialogRequest::Show { dialog } => return self.show(dialog),
            DialogRequest::Delete { dialog } => {
                self.dialogs
                    .remove(&dialog)
                    .ok_or(WireError::UnknownDialog(dialog))?;
                log::debug!("[host] DELETE {dialog}");
                DialogReply::Deleted { dialog }
            }
        };
        self.channel.send(&Message::DialogReply(reply))
    }

    /// Acknowledge SHOW, play the driver's script, then CLOSE.
    fn show(&mut self, dialog: DialogId) -> WireResult<()> {
        let script = {
            let model = self.dialogs.get(&dialog).ok_or(WireError::UnknownDialog(dialog))?;
            self.driver.run(model)
        };
        self.channel
            .send(&Message::DialogReply(DialogReply::Shown { dialog }))?;
        for event in script.events {
            self.channel.send(&Message::DialogEvent {
                dialog,
                item: event.item,
                data: event.data,
            })?;
        }
        log::debug!("[host] CLOSE {dialog} with {}", script.result);
        self.channel.send(&Message::DialogClose {
            dialog,
            result: script.result,
        })
    }

    fn dialog_mut(&mut self, dialog: DialogId) -> WireResult<&mut HostDialog> {
        self.dialogs
            .get_mut(&dialog)
            .ok_or(WireError::UnknownDialog(dialog))
    }

    fn allocate_image(&mut self, request: NewImageRequest) -> WireResult<u32> {
        let NewImageRequest {
            width,
            height,
            kind,
            name,
        } = request;
        let len = u64::from(width) * u64::from(height) * u64::from(kind.channels());
        let len = usize::try_from(len)
            .map_err(|_| WireError::violation(format!("{width}x{height} image is too large")))?;
        let segment = SharedSegment::create(len)?;

        self.next_image += 1;
        let id = self.next_image;
        let descriptor = ImageDescriptor {
            kind,
            id,
            shm_id: segment.id(),
            width,
            height,
            channels: kind.channels(),
            bounds: BoundingBox {
                x0: 0,
                y0: 0,
                x1: i32::try_from(width).unwrap_or(i32::MAX),
                y1: i32::try_from(height).unwrap_or(i32::MAX),
            },
            name,
            colormap: Vec::new(),
        };
        log::info!(
            "[host] image {id} {width}x{height} {kind:?} in segment {}",
            segment.id()
        );
        self.images.insert(id, HostImage { descriptor, segment });
        Ok(id)
    }

    /// Descriptor for IMAGE_GET; unknown ids get an invalid segment.
    fn lookup_descriptor(&self, id: u32) -> ImageDescriptor {
        match self.images.get(&id) {
            Some(image) => image.descriptor.clone(),
            None => {
                log::warn!("[host] IMAGE_GET for unknown image {id}");
                ImageDescriptor {
                    kind: ImageKind::Gray,
                    id,
                    shm_id: -1,
                    width: 0,
                    height: 0,
                    channels: ImageKind::Gray.channels(),
                    bounds: BoundingBox::default(),
                    name: String::new(),
                    colormap: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::pipe::channel_pair;

    #[test]
    fn preloaded_image_round_trips_pixels() {
        let (_ext, host_end) = channel_pair().unwrap();
        let mut host = Host::new(host_end, AutoAcceptDriver);
        let id = host.add_image(2, 2, ImageKind::Gray, "in", &[1, 2, 3, 4]).unwrap();
        assert_eq!(host.image_pixels(id).unwrap(), Some(vec![1, 2, 3, 4]));
        assert_eq!(host.image_descriptor(id).unwrap().bounds.x1, 2);
        assert!(host.add_image(2, 2, ImageKind::Rgb, "bad", &[0; 4]).is_err());
    }

    #[test]
    fn unknown_image_gets_invalid_segment() {
        let (_ext, host_end) = channel_pair().unwrap();
        let host = Host::new(host_end, AutoAcceptDriver);
        assert_eq!(host.lookup_descriptor(77).shm_id, -1);
        assert_eq!(host.image_pixels(77).unwrap(), None);
    }

    #[test]
    fn serve_reports_disconnect() {
        let (ext, host_end) = channel_pair().unwrap();
        drop(ext);
        let mut host = Host::new(host_end, AutoAcceptDriver);
        assert_eq!(host.serve().unwrap(), HostExit::Disconnected);
    }

    #[test]
    fn host_only_kinds_from_extension_are_rejected() {
        let (mut ext, host_end) = channel_pair().unwrap();
        let mut host = Host::new(host_end, AutoAcceptDriver);
        ext.send(&Message::TextAck).unwrap();
        assert!(host.serve().unwrap_err().is_protocol_violation());
    }
}
