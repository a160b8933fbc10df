//! One-byte opcode map, one function per high nibble.

use super::{two_byte, DecodeContext};
use crate::error::Result;
use crate::opcode::{
    AddrSize, AluOp, BcdOp, Condition, FlagOp, Instruction, LoopKind, MulOp, RepMode, ShiftOp, StringOp, Target,
    UnaryOp,
};
use crate::operand::{Addressing, MemoryRef, Operand};
use crate::proxy::FarPointer;
use crate::regs::{Reg16, Reg8, Register, SegReg, Width};

/// `op r/m, reg`, `op reg, r/m`, `op AL, imm8` and `op eAX, imm` for the
/// eight ALU rows.
fn alu_form(ctx: &mut DecodeContext<'_>, code: u8) -> Result<Instruction> {
    let op = AluOp::from_code(code >> 3);
    let (dst, src) = match code & 7 {
        0..=3 => ctx.operand_pair(code)?,
        4 => (Operand::accumulator(Width::Byte), ctx.immediate(Width::Byte)),
        _ => {
            let width = ctx.operand;
            (Operand::accumulator(width), ctx.immediate(width))
        }
    };
    Ok(Instruction::Alu { op, dst, src })
}

fn push_segment(segment: SegReg) -> Instruction {
    Instruction::Push(Operand::segment(segment))
}

fn pop_segment(segment: SegReg) -> Instruction {
    Instruction::Pop(Operand::segment(segment))
}

fn with_segment(ctx: &mut DecodeContext<'_>, segment: SegReg) -> Result<Instruction> {
    ctx.prefixed(|ctx| ctx.segment = Some(segment))
}

fn string(ctx: &DecodeContext<'_>, op: StringOp, code: u8) -> Instruction {
    Instruction::String {
        op,
        width: ctx.sized(code),
        segment: ctx.segment_or(SegReg::Ds),
        addr: ctx.address,
    }
}

/// `A0`-`A3` memory operand: a bare offset in the address size.
fn direct_memory(ctx: &mut DecodeContext<'_>, width: Width) -> MemoryRef {
    let offset = ctx.direct_offset();
    let addressing = match ctx.address {
        AddrSize::A16 => Addressing::Direct16(offset as u16),
        AddrSize::A32 => Addressing::Based32 {
            base: None,
            index: None,
            scale: 0,
            disp: offset as i32,
        },
    };
    MemoryRef::new(ctx.segment_or(SegReg::Ds), addressing, width)
}

fn far_pointer(ctx: &mut DecodeContext<'_>) -> FarPointer {
    let offset = ctx.proxy.next_sized(ctx.operand);
    let segment = ctx.proxy.next_word();
    FarPointer::new(segment, offset)
}

fn register(ctx: &DecodeContext<'_>, code: u8) -> Operand {
    Operand::Register(Register::gpr(ctx.operand, code & 7))
}

pub(super) fn decode_0x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    match code {
        0x06 => Ok(push_segment(SegReg::Es)),
        0x07 => Ok(pop_segment(SegReg::Es)),
        0x0E => Ok(push_segment(SegReg::Cs)),
        0x0F => two_byte::decode(ctx),
        _ => alu_form(ctx, code),
    }
}

pub(super) fn decode_1x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    match code {
        0x16 => Ok(push_segment(SegReg::Ss)),
        0x17 => Ok(pop_segment(SegReg::Ss)),
        0x1E => Ok(push_segment(SegReg::Ds)),
        0x1F => Ok(pop_segment(SegReg::Ds)),
        _ => alu_form(ctx, code),
    }
}

pub(super) fn decode_2x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    match code {
        0x26 => with_segment(ctx, SegReg::Es),
        0x27 => Ok(Instruction::Bcd(BcdOp::Daa)),
        0x2E => with_segment(ctx, SegReg::Cs),
        0x2F => Ok(Instruction::Bcd(BcdOp::Das)),
        _ => alu_form(ctx, code),
    }
}

pub(super) fn decode_3x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    match code {
        0x36 => with_segment(ctx, SegReg::Ss),
        0x37 => Ok(Instruction::Bcd(BcdOp::Aaa)),
        0x3E => with_segment(ctx, SegReg::Ds),
        0x3F => Ok(Instruction::Bcd(BcdOp::Aas)),
        _ => alu_form(ctx, code),
    }
}

/// INC/DEC r16.
pub(super) fn decode_4x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let op = if code < 0x48 { UnaryOp::Inc } else { UnaryOp::Dec };
    Ok(Instruction::Unary {
        op,
        dst: register(ctx, code),
    })
}

/// PUSH/POP r16.
pub(super) fn decode_5x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let reg = register(ctx, code);
    Ok(if code < 0x58 {
        Instruction::Push(reg)
    } else {
        Instruction::Pop(reg)
    })
}

pub(super) fn decode_6x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.operand;
    match code {
        0x60 => Ok(Instruction::PushAll(width)),
        0x61 => Ok(Instruction::PopAll(width)),
        0x62 => {
            let modrm = ctx.next_modrm();
            let bounds = ctx.memory_operand(modrm, width)?;
            Ok(Instruction::Bound {
                index: register(ctx, modrm.reg),
                bounds,
            })
        }
        0x64 => with_segment(ctx, SegReg::Fs),
        0x65 => with_segment(ctx, SegReg::Gs),
        0x66 => ctx.prefixed(|ctx| ctx.operand = Width::Dword),
        0x67 => ctx.prefixed(|ctx| ctx.address = AddrSize::A32),
        0x68 => Ok(Instruction::Push(ctx.immediate(width))),
        0x69 | 0x6B => {
            let modrm = ctx.next_modrm();
            let factor = ctx.rm_operand(modrm, width)?;
            let imm = if code == 0x69 {
                ctx.immediate(width)
            } else {
                ctx.immediate_sx(width)
            };
            Ok(Instruction::ImulTruncate {
                dst: register(ctx, modrm.reg),
                src: factor,
                factor: imm,
            })
        }
        0x6A => Ok(Instruction::Push(ctx.immediate_sx(width))),
        0x6C | 0x6D => Ok(string(ctx, StringOp::Ins, code)),
        0x6E | 0x6F => Ok(string(ctx, StringOp::Outs, code)),
        // 0x63 ARPL is protected-mode only.
        _ => Err(ctx.unhandled()),
    }
}

/// Jcc rel8.
pub(super) fn decode_7x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    Ok(Instruction::Branch {
        cond: Condition::from_code(code),
        target: ctx.relative(Width::Byte),
    })
}

pub(super) fn decode_8x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    match code {
        0x80..=0x83 => {
            let modrm = ctx.next_modrm();
            let width = ctx.sized(code);
            let dst = ctx.rm_operand(modrm, width)?;
            let src = if code == 0x83 {
                ctx.immediate_sx(width)
            } else {
                ctx.immediate(width)
            };
            Ok(Instruction::Alu {
                op: AluOp::from_code(modrm.reg),
                dst,
                src,
            })
        }
        0x84 | 0x85 => {
            let (dst, src) = ctx.operand_pair(code)?;
            Ok(Instruction::Test { dst, src })
        }
        0x86 | 0x87 => {
            let (a, b) = ctx.operand_pair(code)?;
            Ok(Instruction::Xchg { a, b })
        }
        0x88..=0x8B => {
            let (dst, src) = ctx.operand_pair(code)?;
            Ok(Instruction::Mov { dst, src })
        }
        0x8C => {
            let modrm = ctx.next_modrm();
            let segment = SegReg::try_from_code(modrm.reg).ok_or_else(|| ctx.unhandled())?;
            let width = if modrm.is_register() { ctx.operand } else { Width::Word };
            Ok(Instruction::Mov {
                dst: ctx.rm_operand(modrm, width)?,
                src: Operand::segment(segment),
            })
        }
        0x8D => {
            let modrm = ctx.next_modrm();
            let src = ctx.memory_operand(modrm, ctx.operand)?;
            Ok(Instruction::Lea {
                dst: register(ctx, modrm.reg),
                src,
            })
        }
        0x8E => {
            let modrm = ctx.next_modrm();
            let segment = match SegReg::try_from_code(modrm.reg) {
                Some(SegReg::Cs) | None => return Err(ctx.unhandled()),
                Some(segment) => segment,
            };
            Ok(Instruction::Mov {
                dst: Operand::segment(segment),
                src: ctx.rm_operand(modrm, Width::Word)?,
            })
        }
        _ => {
            // 0x8F: POP r/m
            let modrm = ctx.next_modrm();
            if modrm.reg != 0 {
                return Err(ctx.unhandled());
            }
            Ok(Instruction::Pop(ctx.rm_operand(modrm, ctx.operand)?))
        }
    }
}

pub(super) fn decode_9x(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.operand;
    Ok(match code {
        0x90 => Instruction::Nop,
        0x91..=0x97 => Instruction::Xchg {
            a: Operand::accumulator(width),
            b: register(ctx, code),
        },
        0x98 => Instruction::ExtendAccumulator(width),
        0x99 => Instruction::ExtendIntoDx(width),
        0x9A => Instruction::Call {
            target: Target::Far(far_pointer(ctx)),
            width,
        },
        0x9B => Instruction::Wait,
        0x9C => Instruction::PushFlags(width),
        0x9D => Instruction::PopFlags(width),
        0x9E => Instruction::Sahf,
        _ => Instruction::Lahf,
    })
}

pub(super) fn decode_ax(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.sized(code);
    Ok(match code {
        0xA0 | 0xA1 => Instruction::Mov {
            dst: Operand::accumulator(width),
            src: Operand::Memory(direct_memory(ctx, width)),
        },
        0xA2 | 0xA3 => Instruction::Mov {
            dst: Operand::Memory(direct_memory(ctx, width)),
            src: Operand::accumulator(width),
        },
        0xA4 | 0xA5 => string(ctx, StringOp::Movs, code),
        0xA6 | 0xA7 => string(ctx, StringOp::Cmps, code),
        0xA8 | 0xA9 => Instruction::Test {
            dst: Operand::accumulator(width),
            src: ctx.immediate(width),
        },
        0xAA | 0xAB => string(ctx, StringOp::Stos, code),
        0xAC | 0xAD => string(ctx, StringOp::Lods, code),
        _ => string(ctx, StringOp::Scas, code),
    })
}

/// MOV reg, imm.
pub(super) fn decode_bx(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = if code < 0xB8 { Width::Byte } else { ctx.operand };
    Ok(Instruction::Mov {
        dst: Operand::Register(Register::gpr(width, code & 7)),
        src: ctx.immediate(width),
    })
}

fn shift_group(ctx: &mut DecodeContext<'_>, code: u8) -> Result<Instruction> {
    let modrm = ctx.next_modrm();
    let dst = ctx.rm_operand(modrm, ctx.sized(code))?;
    let count = match code {
        0xC0 | 0xC1 => ctx.immediate(Width::Byte),
        0xD0 | 0xD1 => Operand::imm(1, Width::Byte),
        _ => Operand::reg8(Reg8::Cl),
    };
    Ok(Instruction::Shift {
        op: ShiftOp::from_code(modrm.reg),
        dst,
        count,
    })
}

pub(super) fn decode_cx(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.operand;
    match code {
        0xC0 | 0xC1 => shift_group(ctx, code),
        0xC2 | 0xCA => Ok(Instruction::Return {
            far: code == 0xCA,
            release: ctx.proxy.next_word(),
            width,
        }),
        0xC3 | 0xCB => Ok(Instruction::Return {
            far: code == 0xCB,
            release: 0,
            width,
        }),
        0xC4 | 0xC5 => {
            let modrm = ctx.next_modrm();
            let src = ctx.memory_operand(modrm, width)?;
            Ok(Instruction::LoadFarPointer {
                segment: if code == 0xC4 { SegReg::Es } else { SegReg::Ds },
                dst: register(ctx, modrm.reg),
                src,
            })
        }
        0xC6 | 0xC7 => {
            let modrm = ctx.next_modrm();
            if modrm.reg != 0 {
                return Err(ctx.unhandled());
            }
            let width = ctx.sized(code);
            let dst = ctx.rm_operand(modrm, width)?;
            Ok(Instruction::Mov {
                dst,
                src: ctx.immediate(width),
            })
        }
        0xC8 => {
            let size = ctx.proxy.next_word();
            let level = ctx.next_byte();
            Ok(Instruction::Enter { size, level, width })
        }
        0xC9 => Ok(Instruction::Leave(width)),
        0xCC => Ok(Instruction::Breakpoint),
        0xCD => Ok(Instruction::Interrupt(ctx.next_byte())),
        0xCE => Ok(Instruction::InterruptOnOverflow),
        _ => Ok(Instruction::InterruptReturn(width)),
    }
}

pub(super) fn decode_dx(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    match code {
        0xD0..=0xD3 => shift_group(ctx, code),
        0xD4 => Ok(Instruction::Aam(ctx.next_byte())),
        0xD5 => Ok(Instruction::Aad(ctx.next_byte())),
        0xD6 => Ok(Instruction::Salc),
        0xD7 => Ok(Instruction::Xlat {
            segment: ctx.segment_or(SegReg::Ds),
            addr: ctx.address,
        }),
        _ => {
            // FPU escape: consume the operand so the length is right.
            let modrm = ctx.next_byte();
            let form = super::ModRm::from_byte(modrm);
            if !form.is_register() {
                ctx.rm_operand(form, Width::Word)?;
            }
            Ok(Instruction::Escape { opcode: code, modrm })
        }
    }
}

pub(super) fn decode_ex(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.sized(code);
    Ok(match code {
        0xE0..=0xE3 => {
            let kind = match code {
                0xE0 => LoopKind::Loopne,
                0xE1 => LoopKind::Loope,
                0xE2 => LoopKind::Loop,
                _ => LoopKind::Jcxz,
            };
            Instruction::Loop {
                kind,
                target: ctx.relative(Width::Byte),
                addr: ctx.address,
            }
        }
        0xE4 | 0xE5 => Instruction::In {
            dst: Operand::accumulator(width),
            port: ctx.immediate(Width::Byte),
        },
        0xE6 | 0xE7 => Instruction::Out {
            port: ctx.immediate(Width::Byte),
            src: Operand::accumulator(width),
        },
        0xE8 => Instruction::Call {
            target: Target::Near(ctx.relative(ctx.operand)),
            width: ctx.operand,
        },
        0xE9 => Instruction::Jump(Target::Near(ctx.relative(ctx.operand))),
        0xEA => Instruction::Jump(Target::Far(far_pointer(ctx))),
        0xEB => Instruction::Jump(Target::Near(ctx.relative(Width::Byte))),
        0xEC | 0xED => Instruction::In {
            dst: Operand::accumulator(width),
            port: Operand::reg16(Reg16::Dx),
        },
        _ => Instruction::Out {
            port: Operand::reg16(Reg16::Dx),
            src: Operand::accumulator(width),
        },
    })
}

fn repeat(ctx: &mut DecodeContext<'_>, mode: RepMode) -> Result<Instruction> {
    let inner = ctx.dispatch()?;
    // REP on anything but a string instruction is ignored.
    Ok(match inner {
        Instruction::String { .. } => Instruction::Repeat {
            mode,
            inner: Box::new(inner),
        },
        other => other,
    })
}

pub(super) fn decode_fx(ctx: &mut DecodeContext<'_>) -> Result<Instruction> {
    let code = ctx.next_byte();
    let width = ctx.sized(code);
    match code {
        // LOCK has no effect on a single processor.
        0xF0 => ctx.prefixed(|_| {}),
        0xF2 => repeat(ctx, RepMode::Repne),
        0xF3 => repeat(ctx, RepMode::Repe),
        0xF4 => Ok(Instruction::Halt),
        0xF5 => Ok(Instruction::Flag(FlagOp::Cmc)),
        0xF6 | 0xF7 => {
            let modrm = ctx.next_modrm();
            let operand = ctx.rm_operand(modrm, width)?;
            Ok(match modrm.reg {
                0 | 1 => Instruction::Test {
                    dst: operand,
                    src: ctx.immediate(width),
                },
                2 => Instruction::Unary { op: UnaryOp::Not, dst: operand },
                3 => Instruction::Unary { op: UnaryOp::Neg, dst: operand },
                4 => Instruction::MulDiv { op: MulOp::Mul, src: operand },
                5 => Instruction::MulDiv { op: MulOp::Imul, src: operand },
                6 => Instruction::MulDiv { op: MulOp::Div, src: operand },
                _ => Instruction::MulDiv { op: MulOp::Idiv, src: operand },
            })
        }
        0xF8 => Ok(Instruction::Flag(FlagOp::Clc)),
        0xF9 => Ok(Instruction::Flag(FlagOp::Stc)),
        0xFA => Ok(Instruction::Flag(FlagOp::Cli)),
        0xFB => Ok(Instruction::Flag(FlagOp::Sti)),
        0xFC => Ok(Instruction::Flag(FlagOp::Cld)),
        0xFD => Ok(Instruction::Flag(FlagOp::Std)),
        0xFE => {
            let modrm = ctx.next_modrm();
            let op = match modrm.reg {
                0 => UnaryOp::Inc,
                1 => UnaryOp::Dec,
                _ => return Err(ctx.unhandled()),
            };
            Ok(Instruction::Unary {
                op,
                dst: ctx.rm_operand(modrm, Width::Byte)?,
            })
        }
        0xFF => {
            let modrm = ctx.next_modrm();
            let width = ctx.operand;
            match modrm.reg {
                0 | 1 => Ok(Instruction::Unary {
                    op: if modrm.reg == 0 { UnaryOp::Inc } else { UnaryOp::Dec },
                    dst: ctx.rm_operand(modrm, width)?,
                }),
                2 => Ok(Instruction::Call {
                    target: Target::Indirect(ctx.rm_operand(modrm, width)?),
                    width,
                }),
                3 => Ok(Instruction::Call {
                    target: Target::IndirectFar(ctx.memory_operand(modrm, width)?),
                    width,
                }),
                4 => Ok(Instruction::Jump(Target::Indirect(ctx.rm_operand(modrm, width)?))),
                5 => Ok(Instruction::Jump(Target::IndirectFar(ctx.memory_operand(modrm, width)?))),
                6 => Ok(Instruction::Push(ctx.rm_operand(modrm, width)?)),
                _ => Err(ctx.unhandled()),
            }
        }
        // 0xF1 is undefined.
        _ => Err(ctx.unhandled()),
    }
}
