//! Instruction operands.
//!
//! Memory references keep their addressing form rather than a resolved address:
//! the effective address is recomputed from the registers at execution time.

use std::fmt;

use crate::cpu::Cpu;
use crate::error::{AssemblyError, Result};
use crate::regs::{Reg16, Reg32, Reg8, Register, Registers, SegReg, Width};

/// The eight 16-bit base/index combinations selected by ModRM `rm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base16 {
    BxSi,
    BxDi,
    BpSi,
    BpDi,
    Si,
    Di,
    Bp,
    Bx,
}

impl Base16 {
    pub fn from_rm(rm: u8) -> Base16 {
        match rm & 7 {
            0 => Base16::BxSi,
            1 => Base16::BxDi,
            2 => Base16::BpSi,
            3 => Base16::BpDi,
            4 => Base16::Si,
            5 => Base16::Di,
            6 => Base16::Bp,
            _ => Base16::Bx,
        }
    }

    /// BP-relative forms address the stack segment.
    pub fn default_segment(self) -> SegReg {
        match self {
            Base16::BpSi | Base16::BpDi | Base16::Bp => SegReg::Ss,
            _ => SegReg::Ds,
        }
    }

    fn offset(self, regs: &Registers) -> u16 {
        let r = |reg| regs.get16(reg);
        match self {
            Base16::BxSi => r(Reg16::Bx).wrapping_add(r(Reg16::Si)),
            Base16::BxDi => r(Reg16::Bx).wrapping_add(r(Reg16::Di)),
            Base16::BpSi => r(Reg16::Bp).wrapping_add(r(Reg16::Si)),
            Base16::BpDi => r(Reg16::Bp).wrapping_add(r(Reg16::Di)),
            Base16::Si => r(Reg16::Si),
            Base16::Di => r(Reg16::Di),
            Base16::Bp => r(Reg16::Bp),
            Base16::Bx => r(Reg16::Bx),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Base16::BxSi => "BX+SI",
            Base16::BxDi => "BX+DI",
            Base16::BpSi => "BP+SI",
            Base16::BpDi => "BP+DI",
            Base16::Si => "SI",
            Base16::Di => "DI",
            Base16::Bp => "BP",
            Base16::Bx => "BX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addressing {
    /// `[base + disp]` with 16-bit wrap-around.
    Based16 { base: Base16, disp: i16 },
    /// `[disp16]`
    Direct16(u16),
    /// `[base + index << scale + disp]` (address-size prefix forms).
    Based32 {
        base: Option<Reg32>,
        index: Option<Reg32>,
        scale: u8,
        disp: i32,
    },
}

impl Addressing {
    pub fn offset(&self, regs: &Registers) -> u32 {
        match *self {
            Addressing::Based16 { base, disp } => u32::from(base.offset(regs).wrapping_add(disp as u16)),
            Addressing::Direct16(disp) => u32::from(disp),
            Addressing::Based32 { base, index, scale, disp } => {
                let base = base.map_or(0, |r| regs.get32(r));
                let index = index.map_or(0, |r| regs.get32(r) << scale);
                base.wrapping_add(index).wrapping_add(disp as u32)
            }
        }
    }

    /// The same form with `delta` added to the displacement.
    pub fn displaced(self, delta: i32) -> Addressing {
        match self {
            Addressing::Based16 { base, disp } => Addressing::Based16 {
                base,
                disp: disp.wrapping_add(delta as i16),
            },
            Addressing::Direct16(disp) => Addressing::Direct16(disp.wrapping_add(delta as u16)),
            Addressing::Based32 { base, index, scale, disp } => Addressing::Based32 {
                base,
                index,
                scale,
                disp: disp.wrapping_add(delta),
            },
        }
    }
}

/// A sized memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRef {
    pub segment: SegReg,
    pub addressing: Addressing,
    pub width: Width,
}

impl MemoryRef {
    pub fn new(segment: SegReg, addressing: Addressing, width: Width) -> Self {
        Self { segment, addressing, width }
    }

    pub fn offset(&self, regs: &Registers) -> u32 {
        self.addressing.offset(regs)
    }

    pub fn with_width(self, width: Width) -> Self {
        Self { width, ..self }
    }

    pub fn displaced(self, delta: i32) -> Self {
        Self {
            addressing: self.addressing.displaced(delta),
            ..self
        }
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = match self.width {
            Width::Byte => "byte",
            Width::Word => "word",
            Width::Dword => "dword",
        };
        write!(f, "{size} {}:[", self.segment)?;
        match self.addressing {
            Addressing::Based16 { base, disp } => {
                f.write_str(base.name())?;
                write_displacement(f, i32::from(disp))?;
            }
            Addressing::Direct16(disp) => write!(f, "{disp:#06x}")?,
            Addressing::Based32 { base, index, scale, disp } => {
                let mut first = true;
                if let Some(base) = base {
                    write!(f, "{base}")?;
                    first = false;
                }
                if let Some(index) = index {
                    if !first {
                        f.write_str("+")?;
                    }
                    write!(f, "{index}*{}", 1u8 << scale)?;
                    first = false;
                }
                if first {
                    write!(f, "{:#x}", disp as u32)?;
                } else {
                    write_displacement(f, disp)?;
                }
            }
        }
        f.write_str("]")
    }
}

fn write_displacement(f: &mut fmt::Formatter<'_>, disp: i32) -> fmt::Result {
    match disp {
        0 => Ok(()),
        d if d < 0 => write!(f, "-{:#x}", d.unsigned_abs()),
        d => write!(f, "+{d:#x}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate {
    pub value: u32,
    pub width: Width,
}

/// Anything an instruction reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(Register),
    Memory(MemoryRef),
    Immediate(Immediate),
    /// The top of the stack: reading pops, writing pushes.
    Stack(Width),
}

impl Operand {
    pub const fn reg8(reg: Reg8) -> Operand {
        Operand::Register(Register::Byte(reg))
    }

    pub const fn reg16(reg: Reg16) -> Operand {
        Operand::Register(Register::Word(reg))
    }

    pub const fn reg32(reg: Reg32) -> Operand {
        Operand::Register(Register::Dword(reg))
    }

    pub const fn segment(reg: SegReg) -> Operand {
        Operand::Register(Register::Segment(reg))
    }

    pub const fn imm(value: u32, width: Width) -> Operand {
        Operand::Immediate(Immediate { value, width })
    }

    /// The accumulator (`AL`, `AX` or `EAX`) of the given width.
    pub fn accumulator(width: Width) -> Operand {
        Operand::Register(Register::gpr(width, 0))
    }

    pub fn width(&self) -> Width {
        match self {
            Operand::Register(reg) => reg.width(),
            Operand::Memory(mem) => mem.width,
            Operand::Immediate(imm) => imm.width,
            Operand::Stack(width) => *width,
        }
    }

    pub fn read(&self, cpu: &mut Cpu) -> Result<u32> {
        match self {
            Operand::Register(reg) => Ok(cpu.regs.read(*reg)),
            Operand::Memory(mem) => Ok(cpu.read_memory(mem)),
            Operand::Immediate(imm) => Ok(imm.value),
            Operand::Stack(width) => cpu.pop(*width),
        }
    }

    pub fn write(&self, cpu: &mut Cpu, value: u32) -> Result<()> {
        match self {
            Operand::Register(reg) => cpu.regs.write(*reg, value),
            Operand::Memory(mem) => cpu.write_memory(mem, value),
            Operand::Immediate(_) => return Err(AssemblyError::InvalidOperand { operation: "write" }),
            Operand::Stack(width) => cpu.push(value, *width),
        }
        Ok(())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::Memory(mem) => write!(f, "{mem}"),
            Operand::Immediate(imm) => write!(f, "{:#x}", imm.value),
            Operand::Stack(_) => f.write_str("[SS:SP]"),
        }
    }
}
