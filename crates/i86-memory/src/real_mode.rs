use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use thiserror::Error;

use crate::{linear_address, Memory};

/// Size of the conventional real-mode address space (1 MiB).
pub const REAL_MODE_SIZE: usize = 0x10_0000;

/// One past the highest byte reachable as `FFFF:FFFF` with A20 enabled.
pub const HMA_END: usize = 0x10_FFF0;

const BACKING_SIZE: usize = REAL_MODE_SIZE + 0x1_0000;
const A20_DISABLED_MASK: u32 = 0x000F_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("image of {len} bytes does not fit at {segment:04X}:{offset:04X}")]
    ImageTooLarge { segment: u16, offset: u32, len: usize },
}

/// Flat guest RAM covering the real-mode address space and the HMA.
///
/// Bytes are stored as atomics so that the execution thread and a decode-ahead
/// worker can share one instance without locking.
pub struct RealModeMemory {
    bytes: Box<[AtomicU8]>,
    a20: AtomicBool,
}

impl RealModeMemory {
    /// Creates zeroed memory with the A20 line disabled (8086 wrap-around).
    pub fn new() -> Self {
        let bytes = (0..BACKING_SIZE).map(|_| AtomicU8::new(0)).collect();
        Self {
            bytes,
            a20: AtomicBool::new(false),
        }
    }

    pub fn a20_enabled(&self) -> bool {
        self.a20.load(Ordering::Relaxed)
    }

    pub fn set_a20_enabled(&self, enabled: bool) {
        self.a20.store(enabled, Ordering::Relaxed);
    }

    /// Copies `image` into memory at `segment:offset`.
    pub fn load(&self, segment: u16, offset: u32, image: &[u8]) -> Result<(), MemoryError> {
        let start = linear_address(segment, offset) as usize;
        if start.saturating_add(image.len()) > HMA_END {
            return Err(MemoryError::ImageTooLarge {
                segment,
                offset,
                len: image.len(),
            });
        }
        self.set_bytes(segment, offset, image);
        Ok(())
    }

    /// Copies the whole backing store out, mainly for comparing machine states.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    #[inline]
    fn index(&self, segment: u16, offset: u32) -> usize {
        let mut linear = linear_address(segment, offset);
        if !self.a20_enabled() {
            linear &= A20_DISABLED_MASK;
        }
        linear as usize % self.bytes.len()
    }
}

impl Default for RealModeMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RealModeMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealModeMemory")
            .field("size", &self.bytes.len())
            .field("a20", &self.a20_enabled())
            .finish()
    }
}

impl Memory for RealModeMemory {
    #[inline]
    fn get_byte(&self, segment: u16, offset: u32) -> u8 {
        self.bytes[self.index(segment, offset)].load(Ordering::Relaxed)
    }

    #[inline]
    fn set_byte(&self, segment: u16, offset: u32, value: u8) {
        self.bytes[self.index(segment, offset)].store(value, Ordering::Relaxed);
    }
}
