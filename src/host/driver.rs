//! The UI boundary of the host: what happens while a dialog is on screen.
//!
//! A real host renders widgets and forwards user input. The drivers here
//! stand in for that: they decide which widget events fire and how the
//! dialog is closed.

use std::collections::VecDeque;

use super::HostDialog;
use crate::wire::ItemId;

/// One widget event to deliver while a dialog is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedEvent {
    /// Widget that fires.
    pub item: ItemId,
    /// Opaque callback data.
    pub data: Vec<u8>,
}

/// Everything that happens between SHOW and CLOSE for one dialog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogScript {
    /// Events in delivery order.
    pub events: Vec<ScriptedEvent>,
    /// Result code carried by the closing frame.
    pub result: i32,
}

impl DialogScript {
    /// Close immediately with `result`.
    pub fn close_with(result: i32) -> Self {
        Self {
            events: Vec::new(),
            result,
        }
    }

    /// Append an event.
    #[must_use]
    pub fn event(mut self, item: ItemId, data: impl Into<Vec<u8>>) -> Self {
        self.events.push(ScriptedEvent {
            item,
            data: data.into(),
        });
        self
    }
}

/// Decides what a shown dialog does.
pub trait DialogDriver: Send {
    /// Called once per SHOW, after the host has acknowledged it.
    fn run(&mut self, dialog: &HostDialog) -> DialogScript;
}

/// Accepts every dialog at once (result `0`) without touching a widget.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAcceptDriver;

impl DialogDriver for AutoAcceptDriver {
    fn run(&mut self, dialog: &HostDialog) -> DialogScript {
        log::info!("[host] auto-accepting {} \"{}\"", dialog.id, dialog.title);
        DialogScript::close_with(0)
    }
}

/// Plays queued scripts in order, one per SHOW. Falls back to accepting
/// once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    scripts: VecDeque<DialogScript>,
}

impl ScriptedDriver {
    /// Driver that will play `scripts` in order.
    pub fn new(scripts: impl IntoIterator<Item = DialogScript>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
        }
    }

    /// Scripts not yet played.
    pub fn remaining(&self) -> usize {
        self.scripts.len()
    }
}

impl DialogDriver for ScriptedDriver {
    fn run(&mut self, dialog: &HostDialog) -> DialogScript {
        self.scripts.pop_front().unwrap_or_else(|| {
            log::debug!("[host] no script left for {}, accepting", dialog.id);
            DialogScript::close_with(0)
        })
    }
}
