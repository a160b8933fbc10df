//! `0F xx` opcodes: the 286 system instructions and the 386 additions that
//! make sense in real mode.

use super::DecodeContext;
use crate::error::Result;
use crate::opcode::{BitOp, Condition, Instruction};
use crate::operand::Operand;
use crate::regs::{Reg32, Reg8, Register, SegReg, Width};

fn bit_op(code: u8) -> BitOp {
    match (code >> 3) & 3 {
        0 => BitOp::Bt,
        1 => BitOp::Bts,
        2 => BitOp::Btr,
        _ => BitOp::Btc,
    }
}

pub(super) fn decode(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.operand;
    match code {
        0x01 => {
            let modrm = ctx.next_modrm();
            match modrm.reg {
                4 => {
                    let width = if modrm.is_register() { width } else { Width::Word };
                    Ok(Instruction::StoreMsw(ctx.rm_operand(modrm, width)?))
                }
                6 => Ok(Instruction::LoadMsw(ctx.rm_operand(modrm, Width::Word)?)),
                // SGDT/SIDT/LGDT/LIDT/INVLPG
                _ => Err(ctx.unhandled()),
            }
        }
        0x06 => Ok(Instruction::ClearTaskSwitched),
        0x0B => Ok(Instruction::InvalidOpcode),
        0x20 | 0x22 => {
            let modrm = ctx.next_modrm();
            if modrm.reg != 0 {
                return Err(ctx.unhandled());
            }
            let reg = Reg32::from_code(modrm.rm);
            Ok(if code == 0x20 {
                Instruction::ReadCr0(reg)
            } else {
                Instruction::WriteCr0(reg)
            })
        }
        0x80..=0x8F => Ok(Instruction::Branch {
            cond: Condition::from_code(code),
            target: ctx.relative(width),
        }),
        0x90..=0x9F => {
            let modrm = ctx.next_modrm();
            Ok(Instruction::SetCc {
                cond: Condition::from_code(code),
                dst: ctx.rm_operand(modrm, Width::Byte)?,
            })
        }
        0xA0 => Ok(Instruction::Push(Operand::segment(SegReg::Fs))),
        0xA1 => Ok(Instruction::Pop(Operand::segment(SegReg::Fs))),
        0xA8 => Ok(Instruction::Push(Operand::segment(SegReg::Gs))),
        0xA9 => Ok(Instruction::Pop(Operand::segment(SegReg::Gs))),
        0xA3 | 0xAB | 0xB3 | 0xBB => {
            let modrm = ctx.next_modrm();
            let base = ctx.rm_operand(modrm, width)?;
            Ok(Instruction::Bit {
                op: bit_op(code),
                base,
                offset: Operand::Register(Register::gpr(width, modrm.reg)),
            })
        }
        0xA4 | 0xA5 | 0xAC | 0xAD => {
            let modrm = ctx.next_modrm();
            let dst = ctx.rm_operand(modrm, width)?;
            let count = if code & 1 == 0 {
                ctx.immediate(Width::Byte)
            } else {
                Operand::reg8(Reg8::Cl)
            };
            Ok(Instruction::DoubleShift {
                left: code < 0xA8,
                dst,
                src: Operand::Register(Register::gpr(width, modrm.reg)),
                count,
            })
        }
        0xAF => {
            let modrm = ctx.next_modrm();
            let dst = Operand::Register(Register::gpr(width, modrm.reg));
            Ok(Instruction::ImulTruncate {
                dst,
                src: dst,
                factor: ctx.rm_operand(modrm, width)?,
            })
        }
        0xB2 | 0xB4 | 0xB5 => {
            let modrm = ctx.next_modrm();
            let src = ctx.memory_operand(modrm, width)?;
            let segment = match code {
                0xB2 => SegReg::Ss,
                0xB4 => SegReg::Fs,
                _ => SegReg::Gs,
            };
            Ok(Instruction::LoadFarPointer {
                segment,
                dst: Operand::Register(Register::gpr(width, modrm.reg)),
                src,
            })
        }
        0xB6 | 0xB7 | 0xBE | 0xBF => {
            let modrm = ctx.next_modrm();
            let src_width = if code & 1 == 0 { Width::Byte } else { Width::Word };
            Ok(Instruction::MovExtend {
                signed: code >= 0xBE,
                dst: Operand::Register(Register::gpr(width, modrm.reg)),
                src: ctx.rm_operand(modrm, src_width)?,
            })
        }
        0xBA => {
            let modrm = ctx.next_modrm();
            if modrm.reg < 4 {
                return Err(ctx.unhandled());
            }
            let base = ctx.rm_operand(modrm, width)?;
            Ok(Instruction::Bit {
                op: bit_op(modrm.reg << 3),
                base,
                offset: ctx.immediate(Width::Byte),
            })
        }
        0xBC | 0xBD => {
            let modrm = ctx.next_modrm();
            Ok(Instruction::BitScan {
                reverse: code == 0xBD,
                dst: Operand::Register(Register::gpr(width, modrm.reg)),
                src: ctx.rm_operand(modrm, width)?,
            })
        }
        _ => Err(ctx.unhandled()),
    }
}
