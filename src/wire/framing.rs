//! Frame codec for the extension pipes.
//!
//! A frame is a C-layout header followed by a raw payload:
//!
//! ```text
//! [u32 kind][pad to c_long alignment][c_long payload_size] [payload_size bytes]
//! ```
//!
//! The header is the in-memory image of `struct { int kind; long size; }`
//! on the build machine, padding included (16 bytes on LP64). Nothing else
//! in the crate touches the raw descriptors; everything goes through
//! [`write_frame`] and [`read_frame`].
//!
//! Reads accumulate partial results until the exact length is reached and
//! treat EOF as [`WireError::PeerClosed`]. The payload write is a single
//! `write` call: a short write is reported as a transport failure rather
//! than retried.

// Rust guideline compliant 2026-02

use std::io::{self, Read, Write};
use std::mem::{offset_of, size_of};

use crate::error::{WireError, WireResult};

/// Default upper bound on a single payload (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

#[repr(C)]
struct RawHeader {
    kind: u32,
    payload_size: libc::c_long,
}

/// Size of the header on the wire.
pub const HEADER_LEN: usize = size_of::<RawHeader>();

const SIZE_OFFSET: usize = offset_of!(RawHeader, payload_size);
const SIZE_LEN: usize = size_of::<libc::c_long>();

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw message kind.
    pub kind: u32,
    /// Payload length as declared by the sender. Untrusted.
    pub payload_size: i64,
}

impl Header {
    /// Encode into the C layout. Padding bytes are zero.
    pub fn encode(&self) -> WireResult<[u8; HEADER_LEN]> {
        let size = libc::c_long::try_from(self.payload_size).map_err(|_| {
            WireError::violation(format!("payload size {} does not fit c_long", self.payload_size))
        })?;
        let mut buf = [0u8; HEADER_LEN];
        buf[..4].copy_from_slice(&self.kind.to_ne_bytes());
        buf[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN].copy_from_slice(&size.to_ne_bytes());
        Ok(buf)
    }

    /// Decode from the C layout.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&buf[..4]);
        let mut size = [0u8; SIZE_LEN];
        size.copy_from_slice(&buf[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN]);
        Self {
            kind: u32::from_ne_bytes(kind),
            payload_size: i64::from(libc::c_long::from_ne_bytes(size)),
        }
    }
}

/// One frame as read off the wire, before payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Raw message kind.
    pub kind: u32,
    /// Owned payload bytes.
    pub payload: Vec<u8>,
}

/// Write one frame: header, then payload, as two separate writes.
///
/// # Errors
///
/// [`WireError::Transport`] if either write fails or the payload write is
/// short.
pub fn write_frame<W: Write + ?Sized>(w: &mut W, kind: u32, payload: &[u8]) -> WireResult<()> {
    let header = Header {
        kind,
        payload_size: payload.len() as i64,
    }
    .encode()?;
    w.write_all(&header)
        .map_err(|e| WireError::transport("write frame header", e))?;

    if !payload.is_empty() {
        let written = loop {
            match w.write(payload) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::transport("write frame payload", e)),
            }
        };
        if written != payload.len() {
            return Err(WireError::transport(
                "write frame payload",
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {written} of {} bytes", payload.len()),
                ),
            ));
        }
    }

    w.flush().map_err(|e| WireError::transport("flush frame", e))
}

/// Read one frame, blocking until it is complete.
///
/// # Errors
///
/// - [`WireError::PeerClosed`] if the pipe hits EOF at any point.
/// - [`WireError::ProtocolViolation`] if the declared size is negative or
///   above `max_payload`.
/// - [`WireError::Transport`] for any other read failure.
pub fn read_frame<R: Read + ?Sized>(r: &mut R, max_payload: u64) -> WireResult<RawFrame> {
    let mut buf = [0u8; HEADER_LEN];
    read_full(r, &mut buf, "read frame header")?;
    let header = Header::decode(&buf);

    let size = u64::try_from(header.payload_size).map_err(|_| {
        WireError::violation(format!("negative payload size {}", header.payload_size))
    })?;
    if size > max_payload {
        return Err(WireError::violation(format!(
            "frame too large: {size} bytes (max {max_payload})"
        )));
    }

    let mut payload = vec![0u8; size as usize];
    if size > 0 {
        read_full(r, &mut payload, "read frame payload")?;
    }
    Ok(RawFrame {
        kind: header.kind,
        payload,
    })
}

/// Fill `buf` completely, accumulating short reads.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8], context: &'static str) -> WireResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                log::debug!("[wire] EOF after {filled} of {} bytes ({context})", buf.len());
                return Err(WireError::PeerClosed);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WireError::transport(context, e)),
        }
    }
    Ok(())
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out one byte per call.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = buf.len().min(1);
            self.0.read(&mut buf[..end])
        }
    }

    /// Writer that accepts at most `limit` bytes per call.
    struct Stingy {
        out: Vec<u8>,
        limit: usize,
    }

    impl Write for Stingy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn header_matches_c_layout() {
        assert_eq!(HEADER_LEN, 2 * size_of::<libc::c_long>().max(4));
        let bytes = Header { kind: 7, payload_size: 300 }.encode().unwrap();
        assert_eq!(&bytes[..4], &7u32.to_ne_bytes());
        assert!(bytes[4..SIZE_OFFSET].iter().all(|&b| b == 0));
        assert_eq!(Header::decode(&bytes), Header { kind: 7, payload_size: 300 });
    }

    #[test]
    fn frame_round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x06, b"hello").unwrap();
        write_frame(&mut wire, 0x86, &[]).unwrap();
        assert_eq!(wire.len(), 2 * HEADER_LEN + 5);

        let mut r = Cursor::new(wire);
        let first = read_frame(&mut r, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(first, RawFrame { kind: 0x06, payload: b"hello".to_vec() });
        let second = read_frame(&mut r, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(second.payload.is_empty());
    }

    #[test]
    fn partial_reads_accumulate() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x02, &[9; 40]).unwrap();
        let mut r = Trickle(Cursor::new(wire));
        let frame = read_frame(&mut r, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(frame.payload, vec![9; 40]);
    }

    #[test]
    fn eof_mid_header_is_peer_closed() {
        let mut r = Cursor::new(vec![1u8, 0, 0]);
        assert!(matches!(read_frame(&mut r, 64), Err(WireError::PeerClosed)));
    }

    #[test]
    fn eof_mid_payload_is_peer_closed() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x06, b"truncated").unwrap();
        wire.truncate(wire.len() - 3);
        let mut r = Cursor::new(wire);
        assert!(matches!(read_frame(&mut r, 64), Err(WireError::PeerClosed)));
    }

    #[test]
    fn oversized_frame_rejected_before_allocation() {
        let header = Header { kind: 0x06, payload_size: 65 }.encode().unwrap();
        let mut r = Cursor::new(header.to_vec());
        let err = read_frame(&mut r, 64).unwrap_err();
        assert!(err.is_protocol_violation(), "{err}");
    }

    #[test]
    fn negative_size_rejected() {
        let header = Header { kind: 0x06, payload_size: -1 }.encode().unwrap();
        let mut r = Cursor::new(header.to_vec());
        assert!(read_frame(&mut r, 64).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn short_payload_write_is_not_retried() {
        let mut w = Stingy { out: Vec::new(), limit: HEADER_LEN };
        let err = write_frame(&mut w, 0x06, &[1; 32]).unwrap_err();
        assert!(matches!(err, WireError::Transport { .. }));
        // Header went out, then exactly one partial payload write.
        assert_eq!(w.out.len(), 2 * HEADER_LEN);
    }
}
