//! Built-in demo extension that touches every host service once.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::session::{ItemId, ItemKind, Session};
use crate::wire::{ColorTarget, ImageKind, Severity};

/// Knobs for [`run`].
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Raise SIGSEGV after creating the image, to exercise the crash path.
    pub fault: bool,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            width: 64,
            height: 32,
            fault: false,
        }
    }
}

/// What happened during a demo run.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    /// Host id of the gradient image.
    pub image_id: u32,
    /// Foreground color the host reported, as 8-bit RGB.
    pub foreground: [u8; 3],
    /// Result code the dialog closed with.
    pub dialog_result: i32,
    /// Payloads delivered to the "Invert" toggle.
    pub toggle_events: Vec<Vec<u8>>,
}

/// RGB gradient: red grows left to right, green top to bottom.
pub fn gradient_pixel(x: u32, y: u32, width: u32, height: u32) -> [u8; 3] {
    let scale = |v: u32, max: u32| -> u8 {
        if max <= 1 {
            0
        } else {
            (u64::from(v) * 255 / u64::from(max - 1)) as u8
        }
    };
    [scale(x, width), scale(y, height), 128]
}

/// Run the demo against `session`. Leaves nothing attached.
pub fn run(session: &mut Session, options: &DemoOptions) -> Result<DemoReport> {
    let DemoOptions { width, height, .. } = *options;

    let image = session
        .image_new(width, height, ImageKind::Rgb, "gradient")
        .context("Failed to create gradient image")?;

    if options.fault {
        log::warn!("[demo] raising SIGSEGV on request");
        // SAFETY: raise is always safe to call; the installed handler or
        // the default action takes it from here.
        unsafe { libc::raise(libc::SIGSEGV) };
    }

    let image_id = {
        let attached = session
            .image_mut(image)
            .context("gradient image vanished from the registry")?;
        let image_id = attached.descriptor().id;
        let pixels = attached
            .pixels_mut()
            .context("gradient image is not writable")?;
        // A 0xN image has no rows to fill.
        let row_len = (width as usize * 3).max(1);
        for (y, row) in pixels.chunks_exact_mut(row_len).enumerate() {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                px.copy_from_slice(&gradient_pixel(x as u32, y as u32, width, height));
            }
        }
        image_id
    };
    session.progress(0.5, "gradient filled")?;

    let fg = session.color(ColorTarget::Foreground)?;
    let to_byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let foreground = [to_byte(fg.r), to_byte(fg.g), to_byte(fg.b)];
    session.message(
        Severity::Info,
        &format!(
            "foreground is #{:02x}{:02x}{:02x}",
            foreground[0], foreground[1], foreground[2]
        ),
    )?;

    let dialog = session.dialog_new("extlink demo")?;
    let group = session.dialog_add_item(dialog, ItemId::ROOT, ItemKind::Group, "Options")?;
    let toggle = session.dialog_add_item(dialog, group, ItemKind::Toggle, "Invert")?;
    session.dialog_add_item(dialog, ItemId::ROOT, ItemKind::Button, "Apply")?;
    session.dialog_set_value(dialog, toggle, &[0])?;

    let toggle_events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&toggle_events);
    session.set_item_callback(dialog, toggle, move |data| {
        log::info!("[demo] toggle fired with {data:?}");
        sink.borrow_mut().push(data.to_vec());
    })?;

    let dialog_result = session.dialog_show(dialog)?;
    log::info!("[demo] dialog closed with {dialog_result}");
    session.dialog_delete(dialog)?;

    session.release_image(image)?;
    session.progress(1.0, "done")?;

    let toggle_events = toggle_events.borrow().clone();
    Ok(DemoReport {
        image_id,
        foreground,
        dialog_result,
        toggle_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_spans_full_range() {
        assert_eq!(gradient_pixel(0, 0, 64, 32), [0, 0, 128]);
        assert_eq!(gradient_pixel(63, 31, 64, 32), [255, 255, 128]);
        assert_eq!(gradient_pixel(0, 0, 1, 1), [0, 0, 128]);
    }
}
