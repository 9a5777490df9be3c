//! Registry of shared-memory images attached by this session.

use std::collections::HashMap;
use std::fmt;

use crate::error::{WireError, WireResult};
use crate::shm::{Access, Attachment};
use crate::wire::ImageDescriptor;

/// Session-local handle to an attached image.
///
/// Distinct from the host image id: the same host image may be attached
/// more than once, and each attachment gets its own handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(u64);

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image-handle#{}", self.0)
    }
}

/// An image descriptor plus the live mapping of its pixels.
#[derive(Debug)]
pub struct AttachedImage {
    descriptor: ImageDescriptor,
    pixels: Attachment,
}

impl AttachedImage {
    /// Attach the segment named by `descriptor`.
    pub(crate) fn attach(descriptor: ImageDescriptor, access: Access) -> WireResult<Self> {
        let pixels = Attachment::attach(descriptor.shm_id, descriptor.byte_len(), access)?;
        Ok(Self { descriptor, pixels })
    }

    /// What the host told us about the image.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Pixel bytes, row-major, `channels` bytes per pixel.
    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_slice()
    }

    /// Writable pixel bytes; `None` for input images attached read-only.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.pixels.as_mut_slice()
    }

    /// Mapping mode.
    pub fn access(&self) -> Access {
        self.pixels.access()
    }

    fn detach(self) -> WireResult<()> {
        self.pixels.detach()
    }
}

/// The set of live attachments. Sole owner of every [`AttachedImage`].
#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: HashMap<ImageHandle, AttachedImage>,
    next_handle: u64,
}

impl ImageRegistry {
    pub(crate) fn insert(&mut self, image: AttachedImage) -> ImageHandle {
        self.next_handle += 1;
        let handle = ImageHandle(self.next_handle);
        self.images.insert(handle, image);
        handle
    }

    pub(crate) fn get(&self, handle: ImageHandle) -> Option<&AttachedImage> {
        self.images.get(&handle)
    }

    pub(crate) fn get_mut(&mut self, handle: ImageHandle) -> Option<&mut AttachedImage> {
        self.images.get_mut(&handle)
    }

    /// Remove and detach one image.
    pub(crate) fn release(&mut self, handle: ImageHandle) -> WireResult<()> {
        let image = self
            .images
            .remove(&handle)
            .ok_or_else(|| WireError::violation(format!("release of unknown {handle}")))?;
        image.detach()
    }

    /// Detach everything. Keeps going past individual failures and returns
    /// the first one.
    pub(crate) fn drain(&mut self) -> WireResult<()> {
        let mut first_err = None;
        let mut handles: Vec<_> = self.images.keys().copied().collect();
        handles.sort_unstable();
        for handle in handles {
            if let Err(e) = self.release(handle) {
                log::warn!("[session] detach {handle} during drain: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub(crate) fn len(&self) -> usize {
        self.images.len()
    }
}
