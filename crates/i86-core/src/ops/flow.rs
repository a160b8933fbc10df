//! Jumps, calls, returns and software interrupts.

use crate::cpu::{Cpu, Fault};
use crate::error::Result;
use crate::opcode::{AddrSize, Condition, LoopKind, Step, Target};
use crate::operand::{MemoryRef, Operand};
use crate::proxy::{Destination, FarPointer};
use crate::regs::{Register, Width};

const CX: u8 = 1;

fn resolve(cpu: &mut Cpu, target: &Target) -> Result<Destination> {
    Ok(match target {
        Target::Near(offset) => Destination::Near(*offset),
        Target::Far(ptr) => Destination::Far(*ptr),
        Target::Indirect(operand) => Destination::Near(operand.read(cpu)?),
        Target::IndirectFar(mem) => {
            let offset = cpu.read_memory(mem);
            let segment = cpu.read_memory(&mem.displaced(mem.width.bytes() as i32).with_width(Width::Word));
            Destination::Far(FarPointer::new(segment as u16, offset))
        }
    })
}

pub(super) fn jump(cpu: &mut Cpu, target: &Target, length: u8) -> Result<Step> {
    let destination = resolve(cpu, target)?;
    cpu.jump_to(length, destination, false);
    Ok(Step::Jumped)
}

pub(super) fn call(cpu: &mut Cpu, target: &Target, width: Width, length: u8) -> Result<Step> {
    let destination = resolve(cpu, target)?;
    cpu.jump_to_sized(length, destination, true, width);
    Ok(Step::Jumped)
}

pub(super) fn branch(cpu: &mut Cpu, cond: Condition, target: u32) -> Result<Step> {
    if !cond.evaluate(&cpu.flags) {
        return Ok(Step::Continue);
    }
    cpu.regs.set_eip(target);
    Ok(Step::Jumped)
}

pub(super) fn loop_branch(cpu: &mut Cpu, kind: LoopKind, target: u32, addr: AddrSize) -> Result<Step> {
    let counter = Register::gpr(addr.width(), CX);
    let count = cpu.regs.read(counter);
    let taken = match kind {
        LoopKind::Jcxz => count == 0,
        _ => {
            let count = addr.width().truncate(count.wrapping_sub(1));
            cpu.regs.write(counter, count);
            count != 0
                && match kind {
                    LoopKind::Loope => cpu.flags.zero(),
                    LoopKind::Loopne => !cpu.flags.zero(),
                    _ => true,
                }
        }
    };
    if !taken {
        return Ok(Step::Continue);
    }
    cpu.regs.set_eip(target);
    Ok(Step::Jumped)
}

pub(super) fn ret(cpu: &mut Cpu, far: bool, release: u16, width: Width) -> Result<Step> {
    if far {
        cpu.return_far(release, width)
    } else {
        cpu.return_near(release, width)
    }
}

pub(super) fn interrupt(cpu: &mut Cpu, vector: u8, length: u8) -> Result<Step> {
    let return_ip = u32::from(cpu.regs.ip().wrapping_add(u16::from(length)));
    cpu.interrupt(vector, return_ip)
}

pub(super) fn interrupt_on_overflow(cpu: &mut Cpu, length: u8) -> Result<Step> {
    if !cpu.flags.overflow() {
        return Ok(Step::Continue);
    }
    interrupt(cpu, 0x04, length)
}

pub(super) fn bound(cpu: &mut Cpu, index: &Operand, bounds: &MemoryRef) -> Result<Step> {
    let width = index.width();
    let signed = |v: u32| width.sign_extend(v) as i32;
    let value = signed(index.read(cpu)?);
    let lower = signed(cpu.read_memory(&bounds.with_width(width)));
    let upper = signed(cpu.read_memory(&bounds.displaced(width.bytes() as i32).with_width(width)));
    if value < lower || value > upper {
        return cpu.raise_fault(Fault::BoundRange);
    }
    Ok(Step::Continue)
}

pub(super) fn halt(cpu: &mut Cpu, length: u8) -> Result<Step> {
    cpu.advance_ip(length);
    cpu.halt();
    Ok(Step::Halted)
}
