//! ModRM splitting and effective-address forms.

use super::DecodeContext;
use crate::error::Result;
use crate::opcode::AddrSize;
use crate::operand::{Addressing, Base16, MemoryRef, Operand};
use crate::regs::{Reg32, Register, RegisterClass, SegReg, Width};

/// `mod` value of a register-direct `r/m` operand.
const REGISTER_ELEMENT: u8 = 0b11;

/// An opcode byte and its ModRM byte viewed as one 16-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionWord(u16);

impl InstructionWord {
    const ELEMENT_MASK: u16 = 0b0000_0000_1100_0000;
    const REG_MASK: u16 = 0b0000_0000_0011_1000;
    const REF_MASK: u16 = 0b0000_0000_0000_0111;
    const DIRECTION_MASK: u16 = 0b0000_0010_0000_0000;
    const CLASS_MASK: u16 = 0b0000_0001_0000_0000;

    pub fn new(opcode: u8, modrm: u8) -> Self {
        Self((u16::from(opcode) << 8) | u16::from(modrm))
    }

    /// ModRM `mod`: `0b11` selects a register operand.
    pub fn element(self) -> u8 {
        ((self.0 & Self::ELEMENT_MASK) >> 6) as u8
    }

    pub fn reg(self) -> u8 {
        ((self.0 & Self::REG_MASK) >> 3) as u8
    }

    pub fn ref_code(self) -> u8 {
        (self.0 & Self::REF_MASK) as u8
    }

    /// Set when the `reg` operand is the destination.
    pub fn direction(self) -> bool {
        self.0 & Self::DIRECTION_MASK != 0
    }

    /// Set for word/dword operands, clear for bytes.
    pub fn wide(self) -> bool {
        self.0 & Self::CLASS_MASK != 0
    }

    pub fn modrm(self) -> ModRm {
        ModRm::from_byte(self.0 as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    pub mode: u8,
    pub reg: u8,
    pub rm: u8,
}

impl ModRm {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            mode: byte >> 6,
            reg: (byte >> 3) & 7,
            rm: byte & 7,
        }
    }

    pub fn is_register(self) -> bool {
        self.mode == REGISTER_ELEMENT
    }
}

impl DecodeContext<'_> {
    /// The `r/m` operand, consuming any SIB byte and displacement.
    pub(super) fn rm_operand(&mut self, modrm: ModRm, width: Width) -> Result<Operand> {
        if modrm.is_register() {
            return Ok(Operand::Register(Register::gpr(width, modrm.rm)));
        }
        Ok(Operand::Memory(self.memory_form(modrm, width)))
    }

    /// The `r/m` operand of an instruction that only accepts memory.
    pub(super) fn memory_operand(&mut self, modrm: ModRm, width: Width) -> Result<MemoryRef> {
        if modrm.is_register() {
            return Err(self.unhandled());
        }
        Ok(self.memory_form(modrm, width))
    }

    fn memory_form(&mut self, modrm: ModRm, width: Width) -> MemoryRef {
        let (default, addressing) = match self.address {
            AddrSize::A16 => self.address16(modrm),
            AddrSize::A32 => self.address32(modrm),
        };
        MemoryRef::new(self.segment_or(default), addressing, width)
    }

    fn address16(&mut self, modrm: ModRm) -> (SegReg, Addressing) {
        if modrm.mode == 0 && modrm.rm == 6 {
            return (SegReg::Ds, Addressing::Direct16(self.proxy.next_word()));
        }
        let base = Base16::from_rm(modrm.rm);
        let disp = match modrm.mode {
            1 => i16::from(self.proxy.next_byte() as i8),
            2 => self.proxy.next_word() as i16,
            _ => 0,
        };
        (base.default_segment(), Addressing::Based16 { base, disp })
    }

    fn address32(&mut self, modrm: ModRm) -> (SegReg, Addressing) {
        let mut scale = 0;
        let mut index = None;
        let base = if modrm.rm == 4 {
            let sib = self.proxy.next_byte();
            scale = sib >> 6;
            let index_code = (sib >> 3) & 7;
            if index_code != 4 {
                index = Some(Reg32::from_code(index_code));
            }
            let base_code = sib & 7;
            if base_code == 5 && modrm.mode == 0 {
                None
            } else {
                Some(Reg32::from_code(base_code))
            }
        } else if modrm.rm == 5 && modrm.mode == 0 {
            None
        } else {
            Some(Reg32::from_code(modrm.rm))
        };

        let disp = match modrm.mode {
            1 => i32::from(self.proxy.next_byte() as i8),
            2 => self.proxy.next_dword() as i32,
            _ if base.is_none() => self.proxy.next_dword() as i32,
            _ => 0,
        };
        let default = match base {
            Some(Reg32::Esp | Reg32::Ebp) => SegReg::Ss,
            _ => SegReg::Ds,
        };
        (default, Addressing::Based32 { base, index, scale, disp })
    }

    /// `[target, source]` for the two-operand ModRM forms, ordered by the
    /// direction bit.
    pub(super) fn operand_pair(&mut self, opcode: u8) -> Result<(Operand, Operand)> {
        let modrm = self.proxy.next_byte();
        let word = InstructionWord::new(opcode, modrm);
        let width = if word.wide() { self.operand } else { Width::Byte };
        let secondary = if word.element() == REGISTER_ELEMENT {
            Operand::Register(Register::lookup(RegisterClass::General, width, word.ref_code()))
        } else {
            Operand::Memory(self.memory_form(word.modrm(), width))
        };
        let primary = Operand::Register(Register::lookup(RegisterClass::General, width, word.reg()));
        Ok(if word.direction() {
            (primary, secondary)
        } else {
            (secondary, primary)
        })
    }
}
