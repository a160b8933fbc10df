//! String instructions and the REP family.

use super::alu::sub_with_flags;
use crate::cpu::Cpu;
use crate::error::Result;
use crate::opcode::{AddrSize, Instruction, RepMode, StringOp, Step};
use crate::operand::Operand;
use crate::regs::{Reg16, Register, SegReg, Width};

const CX: u8 = 1;
const SI: u8 = 6;
const DI: u8 = 7;

fn index(cpu: &Cpu, code: u8, addr: AddrSize) -> u32 {
    cpu.regs.read(Register::gpr(addr.width(), code))
}

fn step_index(cpu: &mut Cpu, code: u8, addr: AddrSize, width: Width) {
    let reg = Register::gpr(addr.width(), code);
    let delta = if cpu.flags.direction() {
        width.bytes().wrapping_neg()
    } else {
        width.bytes()
    };
    let value = cpu.regs.read(reg).wrapping_add(delta);
    cpu.regs.write(reg, value);
}

/// One iteration of a string instruction. `segment` applies to the SI side;
/// the DI side is always ES.
pub(super) fn string(cpu: &mut Cpu, op: StringOp, width: Width, segment: SegReg, addr: AddrSize) -> Result<Step> {
    let si = index(cpu, SI, addr);
    let di = index(cpu, DI, addr);
    let accumulator = Operand::accumulator(width);

    match op {
        StringOp::Movs => {
            let value = cpu.read_at(segment, si, width);
            cpu.write_at(SegReg::Es, di, width, value);
            step_index(cpu, SI, addr, width);
            step_index(cpu, DI, addr, width);
        }
        StringOp::Cmps => {
            let src = cpu.read_at(segment, si, width);
            let dst = cpu.read_at(SegReg::Es, di, width);
            sub_with_flags(&mut cpu.flags, src, dst, false, width);
            step_index(cpu, SI, addr, width);
            step_index(cpu, DI, addr, width);
        }
        StringOp::Stos => {
            let value = accumulator.read(cpu)?;
            cpu.write_at(SegReg::Es, di, width, value);
            step_index(cpu, DI, addr, width);
        }
        StringOp::Lods => {
            let value = cpu.read_at(segment, si, width);
            accumulator.write(cpu, value)?;
            step_index(cpu, SI, addr, width);
        }
        StringOp::Scas => {
            let value = accumulator.read(cpu)?;
            let dst = cpu.read_at(SegReg::Es, di, width);
            sub_with_flags(&mut cpu.flags, value, dst, false, width);
            step_index(cpu, DI, addr, width);
        }
        StringOp::Ins => {
            let port = cpu.regs.get16(Reg16::Dx);
            let value = cpu.port_in(port, width);
            cpu.write_at(SegReg::Es, di, width, value);
            step_index(cpu, DI, addr, width);
        }
        StringOp::Outs => {
            let port = cpu.regs.get16(Reg16::Dx);
            let value = cpu.read_at(segment, si, width);
            cpu.port_out(port, width, value);
            step_index(cpu, SI, addr, width);
        }
    }
    Ok(Step::Continue)
}

/// Runs `inner` CX (or ECX) times. CMPS and SCAS also stop on the ZF
/// condition selected by `mode`. A prefix on a non-string instruction is
/// ignored.
pub(super) fn repeat(cpu: &mut Cpu, mode: RepMode, inner: &Instruction, length: u8) -> Result<Step> {
    let Instruction::String { op, addr, .. } = inner else {
        return inner.execute(cpu, length);
    };
    let counter = Register::gpr(addr.width(), CX);
    loop {
        let count = cpu.regs.read(counter);
        if count == 0 {
            break;
        }
        inner.execute(cpu, length)?;
        cpu.regs.write(counter, count - 1);
        if op.tests_zero_flag() {
            let zero = cpu.flags.zero();
            match mode {
                RepMode::Repe if !zero => break,
                RepMode::Repne if zero => break,
                _ => {}
            }
        }
    }
    Ok(Step::Continue)
}
