use super::alu::set_result_flags;
use crate::cpu::Cpu;
use crate::error::Result;
use crate::flags::Flags;
use crate::opcode::{ShiftOp, Step};
use crate::operand::Operand;
use crate::regs::Width;

pub(super) fn shift(cpu: &mut Cpu, op: ShiftOp, dst: &Operand, count: &Operand) -> Result<Step> {
    let count = count.read(cpu)? & 0x1F;
    if count == 0 {
        return Ok(Step::Continue);
    }
    let value = dst.read(cpu)?;
    let result = shift_with_flags(&mut cpu.flags, op, value, count, dst.width());
    dst.write(cpu, result)?;
    Ok(Step::Continue)
}

/// Applies a shift or rotate with an already masked, non-zero `count`.
pub fn shift_with_flags(flags: &mut Flags, op: ShiftOp, value: u32, count: u32, width: Width) -> u32 {
    let bits = width.bits();
    let mask = width.mask();
    let msb = |v: u32| v & width.sign_bit() != 0;
    let value = value & mask;

    match op {
        ShiftOp::Rol => {
            let n = count % bits;
            let result = if n == 0 { value } else { ((value << n) | (value >> (bits - n))) & mask };
            let carry = result & 1 != 0;
            flags.set_carry(carry);
            flags.set_overflow(msb(result) ^ carry);
            result
        }
        ShiftOp::Ror => {
            let n = count % bits;
            let result = if n == 0 { value } else { ((value >> n) | (value << (bits - n))) & mask };
            flags.set_carry(msb(result));
            flags.set_overflow(msb(result) ^ (result & (width.sign_bit() >> 1) != 0));
            result
        }
        ShiftOp::Rcl | ShiftOp::Rcr => {
            let span = bits + 1;
            let n = if width == Width::Dword { count } else { count % span };
            let span_mask = (1u64 << span) - 1;
            let combined = (u64::from(flags.carry()) << bits) | u64::from(value);
            let rotated = if op == ShiftOp::Rcl {
                ((combined << n) | (combined >> (span - n))) & span_mask
            } else {
                ((combined >> n) | (combined << (span - n))) & span_mask
            };
            let result = (rotated as u32) & mask;
            let carry = (rotated >> bits) & 1 != 0;
            flags.set_carry(carry);
            if op == ShiftOp::Rcl {
                flags.set_overflow(msb(result) ^ carry);
            } else {
                flags.set_overflow(msb(result) ^ (result & (width.sign_bit() >> 1) != 0));
            }
            result
        }
        ShiftOp::Shl | ShiftOp::Sal => {
            let wide = u64::from(value) << count;
            let result = (wide as u32) & mask;
            let carry = (wide >> bits) & 1 != 0;
            flags.set_carry(carry);
            flags.set_overflow(msb(result) ^ carry);
            set_result_flags(flags, result, width);
            result
        }
        ShiftOp::Shr => {
            let result = value >> count;
            flags.set_carry((value >> (count - 1)) & 1 != 0);
            flags.set_overflow(msb(value));
            set_result_flags(flags, result, width);
            result
        }
        ShiftOp::Sar => {
            let signed = width.sign_extend(value) as i32;
            let result = ((signed >> count) as u32) & mask;
            flags.set_carry((signed >> (count - 1)) & 1 != 0);
            flags.set_overflow(false);
            set_result_flags(flags, result, width);
            result
        }
    }
}

/// SHLD / SHRD.
pub(super) fn double_shift(cpu: &mut Cpu, left: bool, dst: &Operand, src: &Operand, count: &Operand) -> Result<Step> {
    let count = count.read(cpu)? & 0x1F;
    if count == 0 {
        return Ok(Step::Continue);
    }
    let width = dst.width();
    let bits = width.bits();
    let mask = u128::from(width.mask());
    let dest = u128::from(dst.read(cpu)?) & mask;
    let fill = u128::from(src.read(cpu)?) & mask;

    let (result, carry) = if left {
        let shifted = ((dest << bits) | fill) << count;
        ((shifted >> bits) & mask, (shifted >> (2 * bits)) & 1 != 0)
    } else {
        let combined = (fill << bits) | dest;
        ((combined >> count) & mask, (combined >> (count - 1)) & 1 != 0)
    };
    let result = result as u32;
    let sign = width.sign_bit();
    cpu.flags.set_carry(carry);
    cpu.flags.set_overflow((result ^ dest as u32) & sign != 0);
    set_result_flags(&mut cpu.flags, result, width);
    dst.write(cpu, result)?;
    Ok(Step::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(op: ShiftOp, value: u32, count: u32, width: Width, carry: bool) -> (u32, Flags) {
        let mut flags = Flags::RESET;
        flags.set_carry(carry);
        let result = shift_with_flags(&mut flags, op, value, count, width);
        (result, flags)
    }

    #[test]
    fn shl_carries_out_the_last_bit() {
        let (r, f) = run(ShiftOp::Shl, 0x81, 1, Width::Byte, false);
        assert_eq!(r, 0x02);
        assert!(f.carry() && f.overflow());
        let (r, f) = run(ShiftOp::Shl, 0x81, 9, Width::Byte, false);
        assert_eq!(r, 0);
        assert!(!f.carry() && f.zero());
    }

    #[test]
    fn shr_and_sar() {
        let (r, f) = run(ShiftOp::Shr, 0x8001, 1, Width::Word, false);
        assert_eq!(r, 0x4000);
        assert!(f.carry() && f.overflow());
        let (r, f) = run(ShiftOp::Sar, 0x80, 3, Width::Byte, false);
        assert_eq!(r, 0xF0);
        assert!(!f.carry() && f.sign() && !f.overflow());
    }

    #[test]
    fn rotates() {
        let (r, f) = run(ShiftOp::Rol, 0x81, 1, Width::Byte, false);
        assert_eq!(r, 0x03);
        assert!(f.carry());
        let (r, f) = run(ShiftOp::Ror, 0x01, 1, Width::Word, false);
        assert_eq!(r, 0x8000);
        assert!(f.carry() && f.overflow());
        let (r, f) = run(ShiftOp::Rcl, 0x80, 1, Width::Byte, true);
        assert_eq!(r, 0x01);
        assert!(f.carry());
        let (r, f) = run(ShiftOp::Rcr, 0x01, 1, Width::Byte, false);
        assert_eq!(r, 0x00);
        assert!(f.carry());
        let (r, _) = run(ShiftOp::Rcl, 0x55, 9, Width::Byte, false);
        assert_eq!(r, 0x55);
    }
}
