//! Flag control, machine status word access and the FPU escape stub.

use tracing::{trace, warn};

use crate::cpu::{Cpu, Fault};
use crate::error::Result;
use crate::flags::MachineStatus;
use crate::opcode::{FlagOp, Step};
use crate::operand::Operand;
use crate::regs::Reg32;

pub(super) fn flag(cpu: &mut Cpu, op: FlagOp) -> Result<Step> {
    let flags = &mut cpu.flags;
    match op {
        FlagOp::Clc => flags.set_carry(false),
        FlagOp::Stc => flags.set_carry(true),
        FlagOp::Cmc => flags.set_carry(!flags.carry()),
        FlagOp::Cli => flags.set_interrupts(false),
        FlagOp::Sti => flags.set_interrupts(true),
        FlagOp::Cld => flags.set_direction(false),
        FlagOp::Std => flags.set_direction(true),
    }
    Ok(Step::Continue)
}

pub(super) fn store_msw(cpu: &mut Cpu, dst: &Operand) -> Result<Step> {
    let msw = cpu.msw.bits();
    dst.write(cpu, dst.width().truncate(msw))?;
    Ok(Step::Continue)
}

pub(super) fn load_msw(cpu: &mut Cpu, src: &Operand) -> Result<Step> {
    let value = src.read(cpu)? as u16;
    cpu.msw.load_word(value);
    warn_if_leaving_real_mode(cpu);
    Ok(Step::Continue)
}

pub(super) fn clear_task_switched(cpu: &mut Cpu) -> Result<Step> {
    cpu.msw.set_task_switched(false);
    Ok(Step::Continue)
}

pub(super) fn read_cr0(cpu: &mut Cpu, dst: Reg32) -> Result<Step> {
    cpu.regs.set32(dst, cpu.msw.bits());
    Ok(Step::Continue)
}

pub(super) fn write_cr0(cpu: &mut Cpu, src: Reg32) -> Result<Step> {
    cpu.msw = MachineStatus::from_bits_retain(cpu.regs.get32(src));
    warn_if_leaving_real_mode(cpu);
    Ok(Step::Continue)
}

fn warn_if_leaving_real_mode(cpu: &Cpu) {
    if cpu.msw.protection_enabled() {
        warn!(at = %cpu.code_address(), msw = cpu.msw.bits(), "protection enabled; execution continues with real-mode semantics");
    }
}

pub(super) fn escape(cpu: &mut Cpu, opcode: u8, modrm: u8) -> Result<Step> {
    trace!(at = %cpu.code_address(), opcode, modrm, "fpu escape ignored");
    Ok(Step::Continue)
}

pub(super) fn invalid_opcode(cpu: &mut Cpu) -> Result<Step> {
    cpu.raise_fault(Fault::InvalidOpcode)
}
