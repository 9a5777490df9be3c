//! Extension-side session: the state one extension process keeps while it
//! talks to its host.
//!
//! A [`Session`] owns the channel, the registry of attached images, the
//! dialog proxies and the widget callback table. Every host service is a
//! method that performs one synchronous call; [`Session::dialog_show`] is
//! the only operation that pumps host-initiated frames.
//!
//! Operations never exit the process. Errors come back as [`WireError`];
//! only [`Session::fatal`] and [`run_extension`] turn one into an exit.

// Rust guideline compliant 2026-02

pub mod dialog;
pub mod images;
mod runner;

use std::collections::HashMap;

use crate::error::{WireError, WireResult};
use crate::shm::Access;
use crate::wire::{
    Channel, ColorTarget, DialogReply, DialogRequest, ImageKind, Message, NewImageRequest, Rgba,
    Severity,
};

pub use dialog::{CallbackFn, DialogHandle, DialogId, DialogItem, DialogState, ItemId, ItemKind};
pub use images::{AttachedImage, ImageHandle};
pub use runner::{run_extension, run_session, Launch};

use dialog::CallbackTable;
use images::ImageRegistry;

/// Everything one extension process tracks about its host connection.
#[derive(Debug)]
pub struct Session {
    channel: Channel,
    images: ImageRegistry,
    dialogs: HashMap<DialogId, DialogHandle>,
    callbacks: CallbackTable,
}

impl Session {
    /// Wrap a connected channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            images: ImageRegistry::default(),
            dialogs: HashMap::new(),
            callbacks: CallbackTable::default(),
        }
    }

    // ─── Images ────────────────────────────────────────────────────────────

    /// Ask the host for a new image and attach its pixels read-write.
    ///
    /// # Errors
    ///
    /// Any call failure, a descriptor whose geometry disagrees with the
    /// request, or a failed attach.
    pub fn image_new(
        &mut self,
        width: u32,
        height: u32,
        kind: ImageKind,
        name: &str,
    ) -> WireResult<ImageHandle> {
        let request = Message::ImageNew(NewImageRequest {
            width,
            height,
            kind,
            name: name.to_owned(),
        });
        let Message::ImageNewReply(desc) = self.channel.call(&request)? else {
            return Err(WireError::violation("IMAGE_NEW answered with another payload"));
        };
        if desc.width != width
            || desc.height != height
            || desc.kind != kind
            || desc.channels != kind.channels()
        {
            return Err(WireError::violation(format!(
                "host allocated {}x{}x{} {:?} for a {width}x{height} {kind:?} request",
                desc.width, desc.height, desc.channels, desc.kind
            )));
        }
        let image = images::AttachedImage::attach(desc, Access::ReadWrite)?;
        let handle = self.images.insert(image);
        log::info!("[session] new image {handle} {width}x{height} {kind:?} \"{name}\"");
        Ok(handle)
    }

    /// Attach an existing host image. Output images (`writable`) are mapped
    /// read-write, input images read-only.
    ///
    /// # Errors
    ///
    /// Any call failure, or [`WireError::SharedMemory`] when the host does
    /// not know `id` (it answers with an invalid segment).
    pub fn image_get(&mut self, id: u32, writable: bool) -> WireResult<ImageHandle> {
        let Message::ImageGetReply(desc) = self.channel.call(&Message::ImageGet { id, writable })?
        else {
            return Err(WireError::violation("IMAGE_GET answered with another payload"));
        };
        if desc.channels != desc.kind.channels() {
            return Err(WireError::violation(format!(
                "image {} has {} channels for kind {:?}",
                desc.id, desc.channels, desc.kind
            )));
        }
        let access = if writable {
            Access::ReadWrite
        } else {
            Access::ReadOnly
        };
        let image = images::AttachedImage::attach(desc, access)?;
        let handle = self.images.insert(image);
        log::info!("[session] attached host image {id} as {handle} ({access:?})");
        Ok(handle)
    }

    /// Look up an attached image.
    pub fn image(&self, handle: ImageHandle) -> Option<&AttachedImage> {
        self.images.get(handle)
    }

    /// Look up an attached image for writing.
    pub fn image_mut(&mut self, handle: ImageHandle) -> Option<&mut AttachedImage> {
        self.images.get_mut(handle)
    }

    /// Detach one image and forget it.
    ///
    /// # Errors
    ///
    /// Unknown handle, or the detach syscall failed.
    pub fn release_image(&mut self, handle: ImageHandle) -> WireResult<()> {
        self.images.release(handle)
    }

    /// Number of images currently attached.
    pub fn attached_count(&self) -> usize {
        self.images.len()
    }

    // ─── Simple services ───────────────────────────────────────────────────

    /// Current foreground or background color.
    pub fn color(&mut self, target: ColorTarget) -> WireResult<Rgba> {
        match self.channel.call(&Message::ColorQuery(target))? {
            Message::ColorReply(rgba) => Ok(rgba),
            _ => Err(WireError::violation("COLOR_QUERY answered with another payload")),
        }
    }

    /// Report completion in `0.0..=1.0`. Out-of-range values are clamped.
    pub fn progress(&mut self, fraction: f64, label: &str) -> WireResult<()> {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.channel.call(&Message::Progress {
            fraction,
            label: label.to_owned(),
        })?;
        Ok(())
    }

    /// Show a message to the user.
    pub fn message(&mut self, severity: Severity, text: &str) -> WireResult<()> {
        self.channel.call(&Message::Text {
            severity,
            text: text.to_owned(),
        })?;
        Ok(())
    }

    // ─── Dialogs ───────────────────────────────────────────────────────────

    /// Create an empty dialog.
    pub fn dialog_new(&mut self, title: &str) -> WireResult<DialogId> {
        let reply = self.dialog_call(DialogRequest::New {
            title: title.to_owned(),
        })?;
        let DialogReply::Created { dialog } = reply else {
            return Err(WireError::violation(format!("NEW answered with {reply:?}")));
        };
        if self.dialogs.contains_key(&dialog) {
            return Err(WireError::violation(format!("host reissued live {dialog}")));
        }
        self.dialogs.insert(dialog, DialogHandle::new(dialog, title.to_owned()));
        log::debug!("[session] created {dialog} \"{title}\"");
        Ok(dialog)
    }

    /// Add a widget under `parent` ([`ItemId::ROOT`] for top level).
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownDialog`], or a violation if the host answers for
    /// a different dialog or hands out a non-increasing item id.
    pub fn dialog_add_item(
        &mut self,
        dialog: DialogId,
        parent: ItemId,
        kind: ItemKind,
        label: &str,
    ) -> WireResult<ItemId> {
        self.require_dialog(dialog)?;
        let reply = self.dialog_call(DialogRequest::NewItem {
            dialog,
            parent,
            kind,
            label: label.to_owned(),
        })?;
        let DialogReply::ItemCreated { dialog: owner, item } = reply else {
            return Err(WireError::violation(format!("NEW_ITEM answered with {reply:?}")));
        };
        if owner != dialog {
            return Err(WireError::violation(format!(
                "item for {dialog} created in {owner}"
            )));
        }
        self.dialog_mut(dialog)?.push_item(DialogItem {
            id: item,
            parent,
            kind,
            label: label.to_owned(),
        })?;
        Ok(item)
    }

    /// Push a widget value to the host.
    pub fn dialog_set_value(&mut self, dialog: DialogId, item: ItemId, value: &[u8]) -> WireResult<()> {
        self.require_dialog(dialog)?;
        let reply = self.dialog_call(DialogRequest::SetValue {
            dialog,
            item,
            value: value.to_vec(),
        })?;
        match reply {
            DialogReply::ValueSet { dialog: d, item: i } if d == dialog && i == item => Ok(()),
            other => Err(WireError::violation(format!(
                "SET_VALUE for {dialog}/{item} answered with {other:?}"
            ))),
        }
    }

    /// Register `handler` for widget `(dialog, item)`, replacing any previous
    /// one. Events for pairs without a handler are dropped.
    pub fn set_item_callback<F>(&mut self, dialog: DialogId, item: ItemId, handler: F) -> WireResult<()>
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.require_dialog(dialog)?;
        self.callbacks.register(dialog, item, Box::new(handler));
        Ok(())
    }

    /// Display `dialog` modally and block until the host closes it.
    ///
    /// While shown, widget events are delivered to their callbacks from
    /// this call. Returns the CLOSE result code; the handle stays alive in
    /// the `Closed` state until [`Session::dialog_delete`].
    ///
    /// # Errors
    ///
    /// [`WireError::Terminated`] if the host terminates while the dialog
    /// is up; any other frame than an event or close is a violation.
    pub fn dialog_show(&mut self, dialog: DialogId) -> WireResult<i32> {
        self.require_dialog(dialog)?;
        let reply = self.dialog_call(DialogRequest::Show { dialog })?;
        match reply {
            DialogReply::Shown { dialog: d } if d == dialog => {}
            other => {
                return Err(WireError::violation(format!("SHOW of {dialog} answered with {other:?}")))
            }
        }
        self.dialog_mut(dialog)?.set_state(DialogState::Shown);

        loop {
            let msg = self.channel.receive()?;
            self.dispatch(msg)?;
            match self.dialogs.get(&dialog).map(DialogHandle::state) {
                Some(DialogState::Shown) => continue,
                Some(DialogState::Closed(result)) => return Ok(result),
                Some(DialogState::Created) | None => {
                    return Err(WireError::violation(format!("{dialog} left the shown state without CLOSE")))
                }
            }
        }
    }

    /// Destroy `dialog` on both ends and drop its callbacks.
    pub fn dialog_delete(&mut self, dialog: DialogId) -> WireResult<()> {
        self.require_dialog(dialog)?;
        let reply = self.dialog_call(DialogRequest::Delete { dialog })?;
        match reply {
            DialogReply::Deleted { dialog: d } if d == dialog => {}
            other => {
                return Err(WireError::violation(format!("DELETE of {dialog} answered with {other:?}")))
            }
        }
        self.forget_dialog(dialog);
        Ok(())
    }

    /// Look up a dialog proxy.
    pub fn dialog(&self, dialog: DialogId) -> Option<&DialogHandle> {
        self.dialogs.get(&dialog)
    }

    // ─── Shutdown ──────────────────────────────────────────────────────────

    /// Orderly exit: detach every image, then tell the host we are done.
    ///
    /// QUIT is sent even if a detach failed; the first detach error is
    /// returned afterwards.
    pub fn quit(mut self) -> WireResult<()> {
        let drained = self.images.drain();
        self.channel.send(&Message::Quit)?;
        log::info!("[session] sent QUIT");
        drained
    }

    /// Report `err`, clean up as far as possible, and exit the process.
    ///
    /// Host-requested termination exits with status 0, everything else 1.
    pub fn fatal(self, err: impl Into<anyhow::Error>) -> ! {
        let err = self.abort(err);
        exit_with(&err)
    }

    /// Detach everything and send QUIT best-effort, handing `err` back.
    ///
    /// The non-exiting half of [`Session::fatal`].
    pub fn abort(mut self, err: impl Into<anyhow::Error>) -> anyhow::Error {
        let err = err.into();
        if let Err(e) = self.images.drain() {
            log::warn!("[session] image cleanup incomplete: {e}");
        }
        // The host may already be gone; nothing else to do if this fails.
        if let Err(e) = self.channel.send(&Message::Quit) {
            log::debug!("[session] QUIT not delivered: {e}");
        }
        err
    }

    // ─── Internals ─────────────────────────────────────────────────────────

    fn dialog_call(&mut self, request: DialogRequest) -> WireResult<DialogReply> {
        let request = Message::Dialog(request);
        match (&request, self.channel.call(&request)?) {
            (Message::Dialog(req), Message::DialogReply(reply)) if reply.answers(req) => Ok(reply),
            (_, other) => Err(WireError::violation(format!(
                "{other:?} does not answer {request:?}"
            ))),
        }
    }

    /// Handle one host-initiated frame received outside a call.
    fn dispatch(&mut self, msg: Message) -> WireResult<()> {
        match msg {
            Message::DialogEvent { dialog, item, data } => {
                self.callbacks.invoke(dialog, item, &data);
                Ok(())
            }
            Message::DialogClose { dialog, result } => {
                self.close_dialog(dialog, result);
                Ok(())
            }
            Message::Terminate => Err(WireError::Terminated),
            other => Err(WireError::violation(format!(
                "unsolicited {:?} with no call in flight",
                other.kind()
            ))),
        }
    }

    fn close_dialog(&mut self, dialog: DialogId, result: i32) {
        match self.dialogs.get_mut(&dialog) {
            Some(handle) if handle.is_shown() => handle.set_state(DialogState::Closed(result)),
            Some(_) => {
                log::debug!("[session] CLOSE for {dialog} while not shown, deleting");
                self.forget_dialog(dialog);
            }
            None => log::debug!("[session] CLOSE for unknown {dialog}, ignoring"),
        }
    }

    fn forget_dialog(&mut self, dialog: DialogId) {
        self.dialogs.remove(&dialog);
        self.callbacks.remove_dialog(dialog);
        log::debug!("[session] deleted {dialog}");
    }

    fn require_dialog(&self, dialog: DialogId) -> WireResult<()> {
        if self.dialogs.contains_key(&dialog) {
            Ok(())
        } else {
            Err(WireError::UnknownDialog(dialog))
        }
    }

    fn dialog_mut(&mut self, dialog: DialogId) -> WireResult<&mut DialogHandle> {
        self.dialogs
            .get_mut(&dialog)
            .ok_or(WireError::UnknownDialog(dialog))
    }
}

/// Log `err` and exit: status 0 for host-requested termination, 1 otherwise.
fn exit_with(err: &anyhow::Error) -> ! {
    let orderly = err
        .downcast_ref::<WireError>()
        .is_some_and(WireError::is_orderly);
    if orderly {
        log::info!("[session] {err:#}, shutting down");
        std::process::exit(0);
    }
    log::error!("[session] fatal: {err:#}");
    eprintln!("extlink: fatal: {err:#}");
    std::process::exit(1);
}
