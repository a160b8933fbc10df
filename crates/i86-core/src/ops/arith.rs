//! Integer arithmetic, logic, multiply/divide and BCD adjustment.

use super::alu::{add_with_flags, inc_dec_with_flags, logic_with_flags, set_result_flags, sub_with_flags};
use crate::cpu::{Cpu, Fault};
use crate::error::Result;
use crate::opcode::{AluOp, BcdOp, MulOp, Step, UnaryOp};
use crate::operand::Operand;
use crate::regs::{Reg16, Reg32, Reg8, Register, Width};

pub(super) fn alu(cpu: &mut Cpu, op: AluOp, dst: &Operand, src: &Operand) -> Result<Step> {
    let width = dst.width();
    let a = dst.read(cpu)?;
    let b = width.truncate(src.read(cpu)?);
    let carry = cpu.flags.carry();
    let flags = &mut cpu.flags;
    let result = match op {
        AluOp::Add => add_with_flags(flags, a, b, false, width),
        AluOp::Adc => add_with_flags(flags, a, b, carry, width),
        AluOp::Sub | AluOp::Cmp => sub_with_flags(flags, a, b, false, width),
        AluOp::Sbb => sub_with_flags(flags, a, b, carry, width),
        AluOp::And => logic_with_flags(flags, a & b, width),
        AluOp::Or => logic_with_flags(flags, a | b, width),
        AluOp::Xor => logic_with_flags(flags, a ^ b, width),
    };
    if op != AluOp::Cmp {
        dst.write(cpu, result)?;
    }
    Ok(Step::Continue)
}

pub(super) fn test(cpu: &mut Cpu, dst: &Operand, src: &Operand) -> Result<Step> {
    let a = dst.read(cpu)?;
    let b = src.read(cpu)?;
    logic_with_flags(&mut cpu.flags, a & b, dst.width());
    Ok(Step::Continue)
}

pub(super) fn unary(cpu: &mut Cpu, op: UnaryOp, dst: &Operand) -> Result<Step> {
    let width = dst.width();
    let value = dst.read(cpu)?;
    let result = match op {
        UnaryOp::Inc => inc_dec_with_flags(&mut cpu.flags, value, false, width),
        UnaryOp::Dec => inc_dec_with_flags(&mut cpu.flags, value, true, width),
        UnaryOp::Not => width.truncate(!value),
        UnaryOp::Neg => sub_with_flags(&mut cpu.flags, 0, value, false, width),
    };
    dst.write(cpu, result)?;
    Ok(Step::Continue)
}

fn accumulator(cpu: &Cpu, width: Width) -> u32 {
    cpu.regs.read(Register::gpr(width, 0))
}

/// AX, DX:AX or EDX:EAX.
fn wide_dividend(cpu: &Cpu, width: Width) -> u64 {
    let regs = &cpu.regs;
    match width {
        Width::Byte => u64::from(regs.get16(Reg16::Ax)),
        Width::Word => (u64::from(regs.get16(Reg16::Dx)) << 16) | u64::from(regs.get16(Reg16::Ax)),
        Width::Dword => (u64::from(regs.get32(Reg32::Edx)) << 32) | u64::from(regs.get32(Reg32::Eax)),
    }
}

/// Stores a double-width result: AH:AL, DX:AX or EDX:EAX.
fn store_wide(cpu: &mut Cpu, width: Width, low: u32, high: u32) {
    let regs = &mut cpu.regs;
    match width {
        Width::Byte => {
            regs.set8(Reg8::Al, low as u8);
            regs.set8(Reg8::Ah, high as u8);
        }
        Width::Word => {
            regs.set16(Reg16::Ax, low as u16);
            regs.set16(Reg16::Dx, high as u16);
        }
        Width::Dword => {
            regs.set32(Reg32::Eax, low);
            regs.set32(Reg32::Edx, high);
        }
    }
}

fn signed(width: Width, value: u32) -> i64 {
    i64::from(width.sign_extend(value) as i32)
}

pub(super) fn mul_div(cpu: &mut Cpu, op: MulOp, src: &Operand) -> Result<Step> {
    let width = src.width();
    let bits = width.bits();
    let mask = u64::from(width.mask());
    let operand = src.read(cpu)?;

    match op {
        MulOp::Mul => {
            let product = u64::from(accumulator(cpu, width)) * u64::from(operand);
            let high = (product >> bits) & mask;
            store_wide(cpu, width, (product & mask) as u32, high as u32);
            cpu.flags.set_carry(high != 0);
            cpu.flags.set_overflow(high != 0);
        }
        MulOp::Imul => {
            let product = signed(width, accumulator(cpu, width)) * signed(width, operand);
            let low = (product as u64 & mask) as u32;
            let high = ((product >> bits) as u64 & mask) as u32;
            store_wide(cpu, width, low, high);
            let overflow = product != signed(width, low);
            cpu.flags.set_carry(overflow);
            cpu.flags.set_overflow(overflow);
        }
        MulOp::Div => {
            let divisor = u64::from(operand);
            if divisor == 0 {
                return cpu.raise_fault(Fault::DivideError);
            }
            let dividend = wide_dividend(cpu, width);
            let quotient = dividend / divisor;
            if quotient > mask {
                return cpu.raise_fault(Fault::DivideError);
            }
            store_wide(cpu, width, quotient as u32, (dividend % divisor) as u32);
        }
        MulOp::Idiv => {
            let divisor = signed(width, operand);
            let dividend = match width {
                Width::Byte => i64::from(cpu.regs.get16(Reg16::Ax) as i16),
                Width::Word => i64::from(wide_dividend(cpu, width) as u32 as i32),
                Width::Dword => wide_dividend(cpu, width) as i64,
            };
            let (Some(quotient), Some(remainder)) = (dividend.checked_div(divisor), dividend.checked_rem(divisor))
            else {
                return cpu.raise_fault(Fault::DivideError);
            };
            let limit = i64::from(width.sign_bit());
            if quotient < -limit || quotient >= limit {
                return cpu.raise_fault(Fault::DivideError);
            }
            store_wide(cpu, width, (quotient as u64 & mask) as u32, (remainder as u64 & mask) as u32);
        }
    }
    Ok(Step::Continue)
}

/// `IMUL r, r/m` and `IMUL r, r/m, imm`: the product is truncated to the destination.
pub(super) fn imul_truncate(cpu: &mut Cpu, dst: &Operand, src: &Operand, factor: &Operand) -> Result<Step> {
    let width = dst.width();
    let a = signed(width, src.read(cpu)?);
    let b = signed(width, factor.read(cpu)?);
    let product = a * b;
    let result = width.truncate(product as u32);
    let overflow = product != signed(width, result);
    dst.write(cpu, result)?;
    cpu.flags.set_carry(overflow);
    cpu.flags.set_overflow(overflow);
    Ok(Step::Continue)
}

pub(super) fn bcd(cpu: &mut Cpu, op: BcdOp) -> Result<Step> {
    let al = cpu.regs.get8(Reg8::Al);
    let adjust_low = al & 0x0F > 9 || cpu.flags.auxiliary();
    let old_carry = cpu.flags.carry();

    match op {
        BcdOp::Daa => {
            let mut value = al;
            if adjust_low {
                value = value.wrapping_add(6);
            }
            cpu.flags.set_auxiliary(adjust_low);
            let adjust_high = al > 0x99 || old_carry;
            if adjust_high {
                value = value.wrapping_add(0x60);
            }
            cpu.flags.set_carry(adjust_high);
            cpu.regs.set8(Reg8::Al, value);
            set_result_flags(&mut cpu.flags, u32::from(value), Width::Byte);
        }
        BcdOp::Das => {
            let mut value = al;
            let mut carry = false;
            if adjust_low {
                carry = old_carry || al < 6;
                value = value.wrapping_sub(6);
            }
            cpu.flags.set_auxiliary(adjust_low);
            if al > 0x99 || old_carry {
                value = value.wrapping_sub(0x60);
                carry = true;
            }
            cpu.flags.set_carry(carry);
            cpu.regs.set8(Reg8::Al, value);
            set_result_flags(&mut cpu.flags, u32::from(value), Width::Byte);
        }
        BcdOp::Aaa | BcdOp::Aas => {
            if adjust_low {
                let ax = cpu.regs.get16(Reg16::Ax);
                let ax = if op == BcdOp::Aaa {
                    ax.wrapping_add(0x106)
                } else {
                    ax.wrapping_sub(6).wrapping_sub(0x100)
                };
                cpu.regs.set16(Reg16::Ax, ax);
            }
            cpu.flags.set_auxiliary(adjust_low);
            cpu.flags.set_carry(adjust_low);
            let al = cpu.regs.get8(Reg8::Al) & 0x0F;
            cpu.regs.set8(Reg8::Al, al);
        }
    }
    Ok(Step::Continue)
}

pub(super) fn aam(cpu: &mut Cpu, base: u8) -> Result<Step> {
    if base == 0 {
        return cpu.raise_fault(Fault::DivideError);
    }
    let al = cpu.regs.get8(Reg8::Al);
    cpu.regs.set8(Reg8::Ah, al / base);
    cpu.regs.set8(Reg8::Al, al % base);
    set_result_flags(&mut cpu.flags, u32::from(al % base), Width::Byte);
    Ok(Step::Continue)
}

pub(super) fn aad(cpu: &mut Cpu, base: u8) -> Result<Step> {
    let al = cpu.regs.get8(Reg8::Al);
    let ah = cpu.regs.get8(Reg8::Ah);
    let value = al.wrapping_add(ah.wrapping_mul(base));
    cpu.regs.set16(Reg16::Ax, u16::from(value));
    set_result_flags(&mut cpu.flags, u32::from(value), Width::Byte);
    Ok(Step::Continue)
}

pub(super) fn salc(cpu: &mut Cpu) -> Result<Step> {
    let value = if cpu.flags.carry() { 0xFF } else { 0x00 };
    cpu.regs.set8(Reg8::Al, value);
    Ok(Step::Continue)
}

/// CBW / CWDE.
pub(super) fn extend_accumulator(cpu: &mut Cpu, width: Width) -> Result<Step> {
    match width {
        Width::Dword => {
            let ax = cpu.regs.get16(Reg16::Ax);
            cpu.regs.set32(Reg32::Eax, Width::Word.sign_extend(u32::from(ax)));
        }
        _ => {
            let al = cpu.regs.get8(Reg8::Al);
            cpu.regs.set16(Reg16::Ax, Width::Byte.sign_extend(u32::from(al)) as u16);
        }
    }
    Ok(Step::Continue)
}

/// CWD / CDQ.
pub(super) fn extend_into_dx(cpu: &mut Cpu, width: Width) -> Result<Step> {
    match width {
        Width::Dword => {
            let fill = if cpu.regs.get32(Reg32::Eax) & 0x8000_0000 != 0 { u32::MAX } else { 0 };
            cpu.regs.set32(Reg32::Edx, fill);
        }
        _ => {
            let fill = if cpu.regs.get16(Reg16::Ax) & 0x8000 != 0 { 0xFFFF } else { 0 };
            cpu.regs.set16(Reg16::Dx, fill);
        }
    }
    Ok(Step::Continue)
}
