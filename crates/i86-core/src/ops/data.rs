use crate::cpu::Cpu;
use crate::error::Result;
use crate::opcode::{AddrSize, Step};
use crate::operand::{MemoryRef, Operand};
use crate::regs::{Reg16, Reg32, Reg8, SegReg, Width};

pub(super) fn mov(cpu: &mut Cpu, dst: &Operand, src: &Operand) -> Result<Step> {
    let value = src.read(cpu)?;
    dst.write(cpu, value)?;
    Ok(Step::Continue)
}

/// MOVZX / MOVSX.
pub(super) fn mov_extend(cpu: &mut Cpu, signed: bool, dst: &Operand, src: &Operand) -> Result<Step> {
    let value = src.read(cpu)?;
    let value = if signed { src.width().sign_extend(value) } else { value };
    dst.write(cpu, dst.width().truncate(value))?;
    Ok(Step::Continue)
}

pub(super) fn xchg(cpu: &mut Cpu, a: &Operand, b: &Operand) -> Result<Step> {
    let first = a.read(cpu)?;
    let second = b.read(cpu)?;
    a.write(cpu, second)?;
    b.write(cpu, first)?;
    Ok(Step::Continue)
}

pub(super) fn lea(cpu: &mut Cpu, dst: &Operand, src: &MemoryRef) -> Result<Step> {
    let offset = src.offset(&cpu.regs);
    dst.write(cpu, offset)?;
    Ok(Step::Continue)
}

/// LDS/LES/LSS/LFS/LGS: offset first, then the 16-bit selector.
pub(super) fn load_far_pointer(cpu: &mut Cpu, segment: SegReg, dst: &Operand, src: &MemoryRef) -> Result<Step> {
    let width = dst.width();
    let offset = cpu.read_memory(&src.with_width(width));
    let selector = cpu.read_memory(&src.displaced(width.bytes() as i32).with_width(Width::Word));
    dst.write(cpu, offset)?;
    cpu.regs.set_seg(segment, selector as u16);
    Ok(Step::Continue)
}

pub(super) fn xlat(cpu: &mut Cpu, segment: SegReg, addr: AddrSize) -> Result<Step> {
    let al = u32::from(cpu.regs.get8(Reg8::Al));
    let offset = match addr {
        AddrSize::A16 => u32::from(cpu.regs.get16(Reg16::Bx).wrapping_add(al as u16)),
        AddrSize::A32 => cpu.regs.get32(Reg32::Ebx).wrapping_add(al),
    };
    let value = cpu.read_at(segment, offset, Width::Byte);
    cpu.regs.set8(Reg8::Al, value as u8);
    Ok(Step::Continue)
}

pub(super) fn lahf(cpu: &mut Cpu) -> Result<Step> {
    let image = cpu.flags.low_byte();
    cpu.regs.set8(Reg8::Ah, image);
    Ok(Step::Continue)
}

pub(super) fn sahf(cpu: &mut Cpu) -> Result<Step> {
    let ah = cpu.regs.get8(Reg8::Ah);
    cpu.flags.load_low_byte(ah);
    Ok(Step::Continue)
}

pub(super) fn port_in(cpu: &mut Cpu, dst: &Operand, port: &Operand) -> Result<Step> {
    let port = port.read(cpu)? as u16;
    let value = cpu.port_in(port, dst.width());
    dst.write(cpu, value)?;
    Ok(Step::Continue)
}

pub(super) fn port_out(cpu: &mut Cpu, port: &Operand, src: &Operand) -> Result<Step> {
    let port = port.read(cpu)? as u16;
    let value = src.read(cpu)?;
    cpu.port_out(port, src.width(), value);
    Ok(Step::Continue)
}
