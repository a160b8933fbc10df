//! Instruction decoder.
//!
//! Dispatch happens in two levels: the high nibble of the next byte picks one
//! of sixteen range decoders, which then match on the full byte. Prefix bytes
//! record their effect in the [`DecodeContext`] and dispatch again, so the
//! prefix state ends up attached to the one instruction it applies to.

mod modrm;
mod primary;
mod two_byte;

use std::sync::Arc;

use i86_memory::Memory;
use tracing::trace;

pub use modrm::{InstructionWord, ModRm};

use crate::cache::{CacheStats, DecodeCache};
use crate::error::{AssemblyError, Result};
use crate::opcode::{AddrSize, Instruction, OpCode};
use crate::operand::Operand;
use crate::proxy::{CodeAddress, MemoryProxy, MAX_INSTRUCTION_LEN};
use crate::regs::{SegReg, Width};

/// Decodes instructions at a cursor that follows control flow known at
/// decode time.
#[derive(Debug)]
pub struct Decoder {
    proxy: MemoryProxy,
    cache: Option<DecodeCache>,
}

impl Decoder {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self {
            proxy: MemoryProxy::new(memory),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: DecodeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Where the next [`decode`](Self::decode) starts.
    pub fn position(&self) -> CodeAddress {
        self.proxy.position()
    }

    pub fn reposition(&mut self, at: CodeAddress) {
        self.proxy.set_position(at);
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecodeCache::stats)
    }

    /// Decodes one instruction and moves the cursor past it, or to its
    /// target for unconditional direct jumps and calls.
    pub fn decode(&mut self) -> Result<OpCode> {
        let start = self.proxy.position();

        if let Some(cache) = self.cache.as_mut() {
            if let Some(op) = cache.lookup(start, &self.proxy) {
                match op.forced_destination() {
                    Some(destination) => self.proxy.set_destination(destination),
                    None => self
                        .proxy
                        .set_offset(start.offset.wrapping_add(u32::from(op.length()))),
                }
                return Ok(op);
            }
        }

        self.proxy.begin_instruction();
        let instruction = DecodeContext::new(&mut self.proxy, start).dispatch()?;
        let length = self.proxy.consumed();
        if length > MAX_INSTRUCTION_LEN {
            return Err(AssemblyError::InstructionTooLong { address: start });
        }

        let op = OpCode::new(instruction, start, self.proxy.instruction_code(), length as u8);
        if let Some(destination) = op.forced_destination() {
            self.proxy.set_destination(destination);
        }
        trace!(
            target: "i86_core::decode",
            at = %start,
            len = length,
            instruction = ?op.instruction(),
            "decoded"
        );

        if let Some(cache) = self.cache.as_mut() {
            cache.insert(op.clone());
        }
        Ok(op)
    }
}

type RangeDecoder = fn(&mut DecodeContext<'_>) -> Result<Instruction>;

/// Indexed by the high nibble of the opcode byte.
const RANGE_DECODERS: [RangeDecoder; 16] = [
    primary::decode_0x,
    primary::decode_1x,
    primary::decode_2x,
    primary::decode_3x,
    primary::decode_4x,
    primary::decode_5x,
    primary::decode_6x,
    primary::decode_7x,
    primary::decode_8x,
    primary::decode_9x,
    primary::decode_ax,
    primary::decode_bx,
    primary::decode_cx,
    primary::decode_dx,
    primary::decode_ex,
    primary::decode_fx,
];

/// Prefix state and cursor for the instruction being decoded.
pub(crate) struct DecodeContext<'a> {
    proxy: &'a mut MemoryProxy,
    start: CodeAddress,
    segment: Option<SegReg>,
    operand: Width,
    address: AddrSize,
}

impl<'a> DecodeContext<'a> {
    fn new(proxy: &'a mut MemoryProxy, start: CodeAddress) -> Self {
        Self {
            proxy,
            start,
            segment: None,
            operand: Width::Word,
            address: AddrSize::A16,
        }
    }

    fn dispatch(&mut self) -> Result<Instruction> {
        // Bounds prefix chains too.
        if self.proxy.consumed() >= MAX_INSTRUCTION_LEN {
            return Err(AssemblyError::InstructionTooLong { address: self.start });
        }
        let code = self.proxy.peek_at_next_byte();
        RANGE_DECODERS[usize::from(code >> 4)](self)
    }

    /// The error for an encoding no decoder case accepts, carrying the bytes
    /// consumed so far.
    fn unhandled(&self) -> AssemblyError {
        let len = self.proxy.consumed().clamp(1, 4);
        let mask = if len == 4 { u32::MAX } else { (1u32 << (8 * len)) - 1 };
        AssemblyError::UnhandledByteCode {
            code: (self.proxy.instruction_code() as u32) & mask,
            address: self.start,
        }
    }

    fn next_byte(&mut self) -> u8 {
        self.proxy.next_byte()
    }

    fn next_modrm(&mut self) -> ModRm {
        ModRm::from_byte(self.proxy.next_byte())
    }

    fn segment_or(&self, default: SegReg) -> SegReg {
        self.segment.unwrap_or(default)
    }

    /// `Byte` when the opcode's low bit is clear, else the operand size.
    fn sized(&self, opcode: u8) -> Width {
        if opcode & 1 == 0 {
            Width::Byte
        } else {
            self.operand
        }
    }

    fn immediate(&mut self, width: Width) -> Operand {
        Operand::imm(self.proxy.next_sized(width), width)
    }

    /// An imm8 sign-extended to `width`.
    fn immediate_sx(&mut self, width: Width) -> Operand {
        let value = Width::Byte.sign_extend(u32::from(self.proxy.next_byte()));
        Operand::imm(width.truncate(value), width)
    }

    /// Reads a relative displacement of `width` and resolves it against the
    /// end of the instruction.
    fn relative(&mut self, width: Width) -> u32 {
        let disp = width.sign_extend(self.proxy.next_sized(width));
        let target = self.proxy.offset().wrapping_add(disp);
        self.operand.truncate(target)
    }

    /// Offset of an `A0`-`A3` style direct memory operand.
    fn direct_offset(&mut self) -> u32 {
        self.proxy.next_sized(self.address.width())
    }

    /// Applies a prefix and decodes the instruction it belongs to.
    fn prefixed(&mut self, apply: impl FnOnce(&mut Self)) -> Result<Instruction> {
        apply(self);
        self.dispatch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{AluOp, Target};
    use crate::operand::{Addressing, Base16, MemoryRef};
    use crate::proxy::Destination;
    use crate::regs::{Reg16, Reg8};
    use i86_memory::RealModeMemory;

    fn decoder_at(bytes: &[u8]) -> Decoder {
        let mem = Arc::new(RealModeMemory::new());
        mem.set_bytes(0x1000, 0x0100, bytes);
        let mut decoder = Decoder::new(mem);
        decoder.reposition(CodeAddress::new(0x1000, 0x0100));
        decoder
    }

    #[test]
    fn decodes_modrm_with_displacement() {
        // ADD [BP-2], AL
        let mut decoder = decoder_at(&[0x00, 0x46, 0xFE]);
        let op = decoder.decode().unwrap();
        assert_eq!(op.length(), 3);
        assert_eq!(op.instruction_code(), 0xFE_4600);
        assert_eq!(
            op.instruction(),
            &Instruction::Alu {
                op: AluOp::Add,
                dst: Operand::Memory(MemoryRef::new(
                    SegReg::Ss,
                    Addressing::Based16 { base: Base16::Bp, disp: -2 },
                    Width::Byte
                )),
                src: Operand::reg8(Reg8::Al),
            }
        );
        assert_eq!(decoder.position(), CodeAddress::new(0x1000, 0x0103));
    }

    #[test]
    fn segment_override_applies_to_one_instruction() {
        // MOV AX, ES:[SI] ; MOV AX, [SI]
        let mut decoder = decoder_at(&[0x26, 0x8B, 0x04, 0x8B, 0x04]);
        let first = decoder.decode().unwrap();
        let second = decoder.decode().unwrap();
        let segment_of = |op: &OpCode| match op.instruction() {
            Instruction::Mov { src: Operand::Memory(mem), .. } => mem.segment,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(first.length(), 3);
        assert_eq!(segment_of(&first), SegReg::Es);
        assert_eq!(segment_of(&second), SegReg::Ds);
    }

    #[test]
    fn direct_jump_moves_cursor() {
        // JMP +0x10
        let mut decoder = decoder_at(&[0xEB, 0x10]);
        let op = decoder.decode().unwrap();
        assert_eq!(op.forced_destination(), Some(Destination::Near(0x0112)));
        assert_eq!(op.instruction(), &Instruction::Jump(Target::Near(0x0112)));
        assert_eq!(decoder.position(), CodeAddress::new(0x1000, 0x0112));
    }

    #[test]
    fn operand_size_prefix_widens_immediate() {
        let mut decoder = decoder_at(&[0x66, 0xB8, 0x78, 0x56, 0x34, 0x12]);
        let op = decoder.decode().unwrap();
        assert_eq!(op.length(), 6);
        assert!(matches!(
            op.instruction(),
            Instruction::Mov { src: Operand::Immediate(imm), .. } if imm.value == 0x1234_5678
        ));
    }

    #[test]
    fn undefined_encoding_is_reported_with_address() {
        let mut decoder = decoder_at(&[0xF1]);
        assert_eq!(
            decoder.decode(),
            Err(AssemblyError::UnhandledByteCode {
                code: 0xF1,
                address: CodeAddress::new(0x1000, 0x0100)
            })
        );
    }

    #[test]
    fn endless_prefixes_are_too_long() {
        let mut decoder = decoder_at(&[0x26; 20]);
        assert_eq!(
            decoder.decode(),
            Err(AssemblyError::InstructionTooLong {
                address: CodeAddress::new(0x1000, 0x0100)
            })
        );
    }

    #[test]
    fn register_forms_pick_width_from_class_bit() {
        // MOV BX, CX
        let mut decoder = decoder_at(&[0x89, 0xCB]);
        assert_eq!(
            decoder.decode().unwrap().instruction(),
            &Instruction::Mov {
                dst: Operand::reg16(Reg16::Bx),
                src: Operand::reg16(Reg16::Cx)
            }
        );
    }
}
