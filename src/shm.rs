//! SysV shared-memory segments for bulk pixel data.
//!
//! The host creates a segment per image ([`SharedSegment`]) and sends its
//! id over the pipe; the extension maps it with [`Attachment::attach`].
//! Pixels never travel through the pipe.
//!
//! # Ownership
//!
//! - [`SharedSegment`] owns the kernel object and marks it for removal
//!   (`IPC_RMID`) on drop. Existing attachments stay valid until detached.
//! - [`Attachment`] owns one mapping. [`Attachment::detach`] consumes it, so
//!   a mapping is detached exactly once. Dropping an attachment without
//!   calling `detach` still unmaps it and logs a warning.

// Rust guideline compliant 2026-02

use std::io;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::error::{WireError, WireResult};

/// Kernel identifier of a SysV segment.
pub type ShmId = i32;

/// How a segment is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `SHM_RDONLY` mapping; writes through it fault.
    ReadOnly,
    /// Read-write mapping.
    ReadWrite,
}

fn shm_error(context: String) -> WireError {
    WireError::SharedMemory {
        context,
        source: io::Error::last_os_error(),
    }
}

// ─── Segment (creator side) ────────────────────────────────────────────────

/// A segment created by this process.
#[derive(Debug)]
pub struct SharedSegment {
    id: ShmId,
    len: usize,
}

impl SharedSegment {
    /// Create a private, zero-filled segment of `len` bytes (mode `0600`).
    pub fn create(len: usize) -> WireResult<Self> {
        // SysV rejects zero-sized segments.
        let size = len.max(1);
        // SAFETY: plain syscall; the kernel validates every argument.
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return Err(shm_error(format!("shmget {size} bytes")));
        }
        log::debug!("[shm] created segment {id} ({size} bytes)");
        Ok(Self { id, len })
    }

    /// Kernel id to hand to the peer.
    pub fn id(&self) -> ShmId {
        self.id
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length image.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: IPC_RMID on an id we created; a null buffer is allowed.
        let ret = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if ret != 0 {
            log::warn!(
                "[shm] failed to remove segment {}: {}",
                self.id,
                io::Error::last_os_error()
            );
        }
    }
}

// ─── Attachment (mapping) ──────────────────────────────────────────────────

/// A live mapping of a segment into this address space.
#[derive(Debug)]
pub struct Attachment {
    id: ShmId,
    ptr: NonNull<u8>,
    len: usize,
    access: Access,
}

// SAFETY: the mapping is plain memory owned by this value; moving it to
// another thread moves the only handle.
unsafe impl Send for Attachment {}

impl Attachment {
    /// Map segment `id` and view its first `len` bytes.
    ///
    /// # Errors
    ///
    /// [`WireError::SharedMemory`] if the segment does not exist, is not
    /// accessible, or is smaller than `len`.
    pub fn attach(id: ShmId, len: usize, access: Access) -> WireResult<Self> {
        if id < 0 {
            return Err(WireError::SharedMemory {
                context: format!("attach segment {id}"),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        let seg_len = segment_size(id)?;
        if seg_len < len {
            return Err(WireError::SharedMemory {
                context: format!("segment {id} is {seg_len} bytes, need {len}"),
                source: io::Error::from(io::ErrorKind::InvalidInput),
            });
        }

        let flags = match access {
            Access::ReadOnly => libc::SHM_RDONLY,
            Access::ReadWrite => 0,
        };
        // SAFETY: null address lets the kernel pick the mapping location.
        let addr = unsafe { libc::shmat(id, std::ptr::null(), flags) };
        if addr as isize == -1 {
            return Err(shm_error(format!("shmat segment {id} ({access:?})")));
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| shm_error(format!("shmat segment {id} returned null")))?;
        log::debug!("[shm] attached segment {id} ({len} bytes, {access:?})");
        Ok(Self { id, ptr, len, access })
    }

    /// Segment id.
    pub fn id(&self) -> ShmId {
        self.id
    }

    /// Mapping mode.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Viewed length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length view.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read view of the pixels.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` maps at least `len` bytes (checked in `attach`) for
        // as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Write view of the pixels; `None` for read-only mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self.access {
            Access::ReadOnly => None,
            // SAFETY: as in `as_slice`; the mapping is writable and `&mut
            // self` guarantees no other view from this handle.
            Access::ReadWrite => {
                Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
            }
        }
    }

    /// Unmap the segment.
    pub fn detach(self) -> WireResult<()> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `ptr` came from `shmat` and has not been detached yet;
        // ManuallyDrop keeps Drop from detaching it a second time.
        let ret = unsafe { libc::shmdt(this.ptr.as_ptr().cast()) };
        if ret != 0 {
            return Err(shm_error(format!("shmdt segment {}", this.id)));
        }
        log::debug!("[shm] detached segment {}", this.id);
        Ok(())
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        log::warn!("[shm] segment {} dropped while attached, detaching", self.id);
        // SAFETY: same pointer `shmat` returned; Drop runs at most once.
        unsafe { libc::shmdt(self.ptr.as_ptr().cast()) };
    }
}

/// Size of segment `id` as recorded by the kernel.
fn segment_size(id: ShmId) -> WireResult<usize> {
    // SAFETY: zeroed shmid_ds is a valid out-parameter for IPC_STAT.
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    // SAFETY: `ds` is a live, writable shmid_ds.
    let ret = unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) };
    if ret != 0 {
        return Err(shm_error(format!("stat segment {id}")));
    }
    Ok(ds.shm_segsz as usize)
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_visible_through_a_second_mapping() {
        let seg = SharedSegment::create(64).unwrap();

        let mut writer = Attachment::attach(seg.id(), 64, Access::ReadWrite).unwrap();
        writer.as_mut_slice().unwrap()[0] = 0xA5;
        writer.detach().unwrap();

        let reader = Attachment::attach(seg.id(), 64, Access::ReadOnly).unwrap();
        assert_eq!(reader.as_slice()[0], 0xA5);
        reader.detach().unwrap();
    }

    #[test]
    fn read_only_mapping_has_no_write_view() {
        let seg = SharedSegment::create(8).unwrap();
        let mut att = Attachment::attach(seg.id(), 8, Access::ReadOnly).unwrap();
        assert!(att.as_mut_slice().is_none());
        att.detach().unwrap();
    }

    #[test]
    fn missing_segment_is_an_error() {
        assert!(matches!(
            Attachment::attach(-1, 4, Access::ReadOnly),
            Err(WireError::SharedMemory { .. })
        ));
    }

    #[test]
    fn view_larger_than_segment_is_rejected() {
        let seg = SharedSegment::create(16).unwrap();
        assert!(Attachment::attach(seg.id(), 1 << 20, Access::ReadWrite).is_err());
    }
}
