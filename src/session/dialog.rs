//! Extension-side proxies for host-rendered dialogs.
//!
//! # Lifecycle
//!
//! ```text
//! NEW ──► Created ──NEW_ITEM*──► Created ──SHOW──► Shown ──CLOSE──► Closed
//!            │                                                        │
//!            └──────── CLOSE while not shown: deleted ◄── DELETE ─────┘
//! ```
//!
//! Item callbacks are keyed by `(dialog, item)` and live in a table next
//! to the dialogs so a callback delivery never has to walk dialog state.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::fmt;

use crate::error::{WireError, WireResult};
pub use crate::wire::protocol::{DialogId, ItemId, ItemKind};

/// Where a dialog is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Created and accepting items; not on screen.
    Created,
    /// On screen; a SHOW caller is blocked on it.
    Shown,
    /// Closed by the host with a result code.
    Closed(i32),
}

/// One widget added to a dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogItem {
    /// Host-assigned id.
    pub id: ItemId,
    /// Parent item, [`ItemId::ROOT`] for top level.
    pub parent: ItemId,
    /// Widget type.
    pub kind: ItemKind,
    /// Caption.
    pub label: String,
}

/// Extension-side proxy for a dialog the host renders.
#[derive(Debug, Clone)]
pub struct DialogHandle {
    id: DialogId,
    title: String,
    state: DialogState,
    items: Vec<DialogItem>,
}

impl DialogHandle {
    pub(crate) fn new(id: DialogId, title: String) -> Self {
        Self {
            id,
            title,
            state: DialogState::Created,
            items: Vec::new(),
        }
    }

    /// Host-assigned id.
    pub fn id(&self) -> DialogId {
        self.id
    }

    /// Window title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DialogState {
        self.state
    }

    /// Returns `true` while a SHOW caller is blocked on this dialog.
    pub fn is_shown(&self) -> bool {
        self.state == DialogState::Shown
    }

    /// Result code carried by the last CLOSE, if any.
    pub fn result(&self) -> Option<i32> {
        match self.state {
            DialogState::Closed(code) => Some(code),
            _ => None,
        }
    }

    /// Items in creation order.
    pub fn items(&self) -> &[DialogItem] {
        &self.items
    }

    /// Record a freshly created item.
    ///
    /// The host must hand out ids in strictly increasing order; anything
    /// else means the two ends disagree about this dialog.
    pub(crate) fn push_item(&mut self, item: DialogItem) -> WireResult<()> {
        if let Some(last) = self.items.last() {
            if item.id <= last.id {
                return Err(WireError::violation(format!(
                    "{} issued {} after {}",
                    self.id, item.id, last.id
                )));
            }
        } else if item.id == ItemId::ROOT {
            return Err(WireError::violation(format!("{} issued the root id to an item", self.id)));
        }
        if item.parent != ItemId::ROOT && !self.items.iter().any(|i| i.id == item.parent) {
            return Err(WireError::violation(format!(
                "{} accepted {} under unknown parent {}",
                self.id, item.id, item.parent
            )));
        }
        self.items.push(item);
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: DialogState) {
        log::debug!("[session] {} {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}

/// Handler invoked with the opaque data of a callback delivery.
pub type CallbackFn = Box<dyn FnMut(&[u8])>;

/// A registered widget callback.
pub struct ItemCallback {
    dialog: DialogId,
    item: ItemId,
    handler: CallbackFn,
}

impl fmt::Debug for ItemCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemCallback")
            .field("dialog", &self.dialog)
            .field("item", &self.item)
            .finish_non_exhaustive()
    }
}

/// Callbacks keyed by `(dialog, item)`.
#[derive(Debug, Default)]
pub(crate) struct CallbackTable {
    entries: HashMap<(DialogId, ItemId), ItemCallback>,
}

impl CallbackTable {
    /// Register or replace the callback for `(dialog, item)`.
    pub(crate) fn register(&mut self, dialog: DialogId, item: ItemId, handler: CallbackFn) {
        let previous = self.entries.insert(
            (dialog, item),
            ItemCallback {
                dialog,
                item,
                handler,
            },
        );
        if previous.is_some() {
            log::debug!("[session] replaced callback for {dialog}/{item}");
        }
    }

    /// Run the callback for `(dialog, item)`. Returns `false` when none is
    /// registered, which is normal while a dialog is being torn down.
    pub(crate) fn invoke(&mut self, dialog: DialogId, item: ItemId, data: &[u8]) -> bool {
        match self.entries.get_mut(&(dialog, item)) {
            Some(cb) => {
                (cb.handler)(data);
                true
            }
            None => {
                log::debug!("[session] no callback for {dialog}/{item}, dropping event");
                false
            }
        }
    }

    /// Drop every callback belonging to `dialog`.
    pub(crate) fn remove_dialog(&mut self, dialog: DialogId) {
        self.entries.retain(|(d, _), _| *d != dialog);
    }

    pub(crate) fn len_for(&self, dialog: DialogId) -> usize {
        self.entries.keys().filter(|(d, _)| *d == dialog).count()
    }
}
