//! Segment-relative guest memory.
//!
//! Every access made by the CPU core is expressed as a `segment:offset` pair; the
//! [`Memory`] trait is the seam between the core and whatever backs guest RAM.
//! Implementations are shared between the execution thread and the decode-ahead
//! worker behind an `Arc`, so all methods take `&self` and rely on interior
//! mutability.
//!
//! [`RealModeMemory`] is the reference implementation: a flat 1 MiB (plus HMA)
//! array addressed as `(segment << 4) + offset`, with A20 gating.

#![forbid(unsafe_code)]

mod real_mode;

pub use real_mode::{MemoryError, RealModeMemory, HMA_END, REAL_MODE_SIZE};

/// Computes the 20-bit-and-up linear address for a `segment:offset` pair.
///
/// The result is not masked; A20 gating is the memory implementation's concern.
#[inline]
pub const fn linear_address(segment: u16, offset: u32) -> u32 {
    ((segment as u32) << 4).wrapping_add(offset)
}

/// Guest memory as seen by the CPU core.
pub trait Memory: Send + Sync {
    fn get_byte(&self, segment: u16, offset: u32) -> u8;
    fn set_byte(&self, segment: u16, offset: u32, value: u8);

    fn get_word(&self, segment: u16, offset: u32) -> u16 {
        let lo = self.get_byte(segment, offset);
        let hi = self.get_byte(segment, offset.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn get_dword(&self, segment: u16, offset: u32) -> u32 {
        let lo = self.get_word(segment, offset);
        let hi = self.get_word(segment, offset.wrapping_add(2));
        u32::from(lo) | (u32::from(hi) << 16)
    }

    /// Fills `buf` with consecutive bytes starting at `segment:offset`.
    fn get_bytes(&self, segment: u16, offset: u32, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.get_byte(segment, offset.wrapping_add(i as u32));
        }
    }

    /// Reads up to eight bytes as one little-endian integer.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds 8.
    fn get_bytes_as_long(&self, segment: u16, offset: u32, len: usize) -> u64 {
        assert!(len <= 8, "get_bytes_as_long reads at most 8 bytes (got {len})");
        let mut buf = [0u8; 8];
        self.get_bytes(segment, offset, &mut buf[..len]);
        u64::from_le_bytes(buf)
    }

    fn set_word(&self, segment: u16, offset: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.set_byte(segment, offset, lo);
        self.set_byte(segment, offset.wrapping_add(1), hi);
    }

    fn set_dword(&self, segment: u16, offset: u32, value: u32) {
        self.set_word(segment, offset, value as u16);
        self.set_word(segment, offset.wrapping_add(2), (value >> 16) as u16);
    }

    fn set_bytes(&self, segment: u16, offset: u32, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.set_byte(segment, offset.wrapping_add(i as u32), byte);
        }
    }
}

impl<M: Memory + ?Sized> Memory for std::sync::Arc<M> {
    fn get_byte(&self, segment: u16, offset: u32) -> u8 {
        (**self).get_byte(segment, offset)
    }

    fn set_byte(&self, segment: u16, offset: u32, value: u8) {
        (**self).set_byte(segment, offset, value)
    }
}
