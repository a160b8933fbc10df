use crate::cpu::Cpu;
use crate::error::Result;
use crate::opcode::Step;
use crate::operand::Operand;
use crate::regs::{Register, SegReg, Width};

const SP: u8 = 4;
const BP: u8 = 5;

pub(super) fn push(cpu: &mut Cpu, src: &Operand) -> Result<Step> {
    let value = src.read(cpu)?;
    Operand::Stack(src.width()).write(cpu, value)?;
    Ok(Step::Continue)
}

pub(super) fn pop(cpu: &mut Cpu, dst: &Operand) -> Result<Step> {
    let value = Operand::Stack(dst.width()).read(cpu)?;
    dst.write(cpu, value)?;
    Ok(Step::Continue)
}

/// PUSHA/PUSHAD: AX, CX, DX, BX, the original SP, BP, SI, DI.
pub(super) fn push_all(cpu: &mut Cpu, width: Width) -> Result<Step> {
    let original_sp = cpu.regs.read(Register::gpr(width, SP));
    for code in 0..8 {
        let value = if code == SP {
            original_sp
        } else {
            cpu.regs.read(Register::gpr(width, code))
        };
        cpu.push(value, width);
    }
    Ok(Step::Continue)
}

/// POPA/POPAD: the stacked SP is discarded.
pub(super) fn pop_all(cpu: &mut Cpu, width: Width) -> Result<Step> {
    for code in (0..8).rev() {
        let value = cpu.pop(width)?;
        if code != SP {
            cpu.regs.write(Register::gpr(width, code), value);
        }
    }
    Ok(Step::Continue)
}

pub(super) fn push_flags(cpu: &mut Cpu, width: Width) -> Result<Step> {
    let image = cpu.flags.image(width);
    cpu.push(image, width);
    Ok(Step::Continue)
}

pub(super) fn pop_flags(cpu: &mut Cpu, width: Width) -> Result<Step> {
    let image = cpu.pop(width)?;
    cpu.flags.load(image, width);
    Ok(Step::Continue)
}

pub(super) fn enter(cpu: &mut Cpu, size: u16, level: u8, width: Width) -> Result<Step> {
    let level = level & 0x1F;
    let bp = Register::gpr(width, BP);
    let bp_value = cpu.regs.read(bp);
    cpu.push(bp_value, width);
    let frame = u32::from(cpu.regs.sp());

    if level > 0 {
        let mut outer = cpu.regs.read(Register::gpr(Width::Word, BP));
        for _ in 1..level {
            outer = u32::from((outer as u16).wrapping_sub(width.bytes() as u16));
            let link = cpu.read_at(SegReg::Ss, outer, width);
            cpu.push(link, width);
        }
        cpu.push(frame, width);
    }

    cpu.regs.write(bp, frame);
    let sp = cpu.regs.sp().wrapping_sub(size);
    cpu.regs.set_sp(sp);
    Ok(Step::Continue)
}

pub(super) fn leave(cpu: &mut Cpu, width: Width) -> Result<Step> {
    let bp = cpu.regs.read(Register::gpr(Width::Word, BP));
    cpu.regs.set_sp(bp as u16);
    let saved = cpu.pop(width)?;
    cpu.regs.write(Register::gpr(width, BP), saved);
    Ok(Step::Continue)
}
