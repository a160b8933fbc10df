//! Segmented addressing on top of the memory collaborator.
//!
//! [`MemoryProxy`] serves two roles: the CPU's data path (sized reads and writes
//! at `segment:offset`) and the decoder's forward-only instruction cursor.

use std::fmt;
use std::sync::Arc;

use i86_memory::{linear_address, Memory};

use crate::regs::Width;

/// Longest legal instruction encoding.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// A `CS:IP` style code location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodeAddress {
    pub segment: u16,
    pub offset: u32,
}

impl CodeAddress {
    pub const fn new(segment: u16, offset: u32) -> Self {
        Self { segment, offset }
    }

    pub const fn linear(self) -> u32 {
        linear_address(self.segment, self.offset)
    }
}

impl fmt::Display for CodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}

/// A `segment:offset` far pointer as encoded in `JMP ptr16:16` or an IVT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FarPointer {
    pub segment: u16,
    pub offset: u32,
}

impl FarPointer {
    pub const fn new(segment: u16, offset: u32) -> Self {
        Self { segment, offset }
    }

    pub const fn is_null(self) -> bool {
        self.segment == 0 && self.offset == 0
    }
}

impl fmt::Display for FarPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}

impl From<FarPointer> for CodeAddress {
    fn from(ptr: FarPointer) -> Self {
        CodeAddress::new(ptr.segment, ptr.offset)
    }
}

/// Where a jump, call or return transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Offset within the current code segment.
    Near(u32),
    Far(FarPointer),
}

pub struct MemoryProxy {
    memory: Arc<dyn Memory>,
    segment: u16,
    offset: u32,
    captured: [u8; MAX_INSTRUCTION_LEN],
    consumed: usize,
}

impl MemoryProxy {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self {
            memory,
            segment: 0,
            offset: 0,
            captured: [0; MAX_INSTRUCTION_LEN],
            consumed: 0,
        }
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    // Data path.

    pub fn read(&self, segment: u16, offset: u32, width: Width) -> u32 {
        match width {
            Width::Byte => u32::from(self.memory.get_byte(segment, offset)),
            Width::Word => u32::from(self.memory.get_word(segment, offset)),
            Width::Dword => self.memory.get_dword(segment, offset),
        }
    }

    pub fn write(&self, segment: u16, offset: u32, width: Width, value: u32) {
        match width {
            Width::Byte => self.memory.set_byte(segment, offset, value as u8),
            Width::Word => self.memory.set_word(segment, offset, value as u16),
            Width::Dword => self.memory.set_dword(segment, offset, value),
        }
    }

    // Instruction cursor.

    pub fn segment(&self) -> u16 {
        self.segment
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn position(&self) -> CodeAddress {
        CodeAddress::new(self.segment, self.offset)
    }

    pub fn set_segment(&mut self, segment: u16) {
        self.segment = segment;
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.offset = offset & 0xFFFF;
    }

    pub fn set_position(&mut self, at: CodeAddress) {
        self.set_segment(at.segment);
        self.set_offset(at.offset);
    }

    /// Repositions the cursor at a jump target computed during decode.
    pub fn set_destination(&mut self, destination: Destination) {
        match destination {
            Destination::Near(offset) => self.set_offset(offset),
            Destination::Far(ptr) => self.set_position(ptr.into()),
        }
    }

    /// Marks the current position as the start of a new instruction.
    pub fn begin_instruction(&mut self) {
        self.consumed = 0;
    }

    /// Bytes consumed since [`begin_instruction`](Self::begin_instruction).
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// The consumed bytes as one little-endian integer (at most 15 are kept).
    pub fn instruction_code(&self) -> u128 {
        let len = self.consumed.min(MAX_INSTRUCTION_LEN);
        self.captured[..len]
            .iter()
            .rev()
            .fold(0u128, |acc, &b| (acc << 8) | u128::from(b))
    }

    pub fn peek_at_next_byte(&self) -> u8 {
        self.memory.get_byte(self.segment, self.offset)
    }

    pub fn next_byte(&mut self) -> u8 {
        let byte = self.memory.get_byte(self.segment, self.offset);
        if self.consumed < MAX_INSTRUCTION_LEN {
            self.captured[self.consumed] = byte;
        }
        self.consumed += 1;
        self.offset = (self.offset + 1) & 0xFFFF;
        byte
    }

    pub fn next_word(&mut self) -> u16 {
        let lo = self.next_byte();
        let hi = self.next_byte();
        u16::from_le_bytes([lo, hi])
    }

    pub fn next_dword(&mut self) -> u32 {
        let lo = self.next_word();
        let hi = self.next_word();
        u32::from(lo) | (u32::from(hi) << 16)
    }

    /// Reads an immediate of the given width.
    pub fn next_sized(&mut self, width: Width) -> u32 {
        match width {
            Width::Byte => u32::from(self.next_byte()),
            Width::Word => u32::from(self.next_word()),
            Width::Dword => self.next_dword(),
        }
    }

    /// True when the bytes at `at` equal `code` for `len` bytes.
    pub fn matches(&self, at: CodeAddress, code: u128, len: usize) -> bool {
        (0..len).all(|i| {
            let offset = at.offset.wrapping_add(i as u32) & 0xFFFF;
            self.memory.get_byte(at.segment, offset) == (code >> (8 * i)) as u8
        })
    }
}

impl fmt::Debug for MemoryProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProxy")
            .field("position", &self.position())
            .field("consumed", &self.consumed)
            .finish()
    }
}
