use crate::cpu::Cpu;
use crate::error::Result;
use crate::opcode::{BitOp, Condition, Step};
use crate::operand::Operand;

/// BT/BTS/BTR/BTC. A register offset into memory may address bits outside
/// the operand; the access moves by whole operands to reach them.
pub(super) fn bit_test(cpu: &mut Cpu, op: BitOp, base: &Operand, offset: &Operand) -> Result<Step> {
    let width = base.width();
    let bits = width.bits();
    let raw = offset.read(cpu)?;

    let (target, bit) = match (base, offset) {
        (Operand::Memory(mem), Operand::Register(_)) => {
            let signed = i64::from(width.sign_extend(raw) as i32);
            let unit = i64::from(bits);
            let delta = signed.div_euclid(unit) * i64::from(width.bytes());
            (Operand::Memory(mem.displaced(delta as i32)), signed.rem_euclid(unit) as u32)
        }
        _ => (*base, raw % bits),
    };

    let value = target.read(cpu)?;
    let mask = 1u32 << bit;
    cpu.flags.set_carry(value & mask != 0);
    let updated = match op {
        BitOp::Bt => return Ok(Step::Continue),
        BitOp::Bts => value | mask,
        BitOp::Btr => value & !mask,
        BitOp::Btc => value ^ mask,
    };
    target.write(cpu, updated)?;
    Ok(Step::Continue)
}

/// BSF / BSR. A zero source sets ZF and leaves the destination unchanged.
pub(super) fn bit_scan(cpu: &mut Cpu, reverse: bool, dst: &Operand, src: &Operand) -> Result<Step> {
    let value = src.width().truncate(src.read(cpu)?);
    if value == 0 {
        cpu.flags.set_zero(true);
        return Ok(Step::Continue);
    }
    cpu.flags.set_zero(false);
    let index = if reverse { 31 - value.leading_zeros() } else { value.trailing_zeros() };
    dst.write(cpu, index)?;
    Ok(Step::Continue)
}

pub(super) fn set_cc(cpu: &mut Cpu, cond: Condition, dst: &Operand) -> Result<Step> {
    let value = u32::from(cond.evaluate(&cpu.flags));
    dst.write(cpu, value)?;
    Ok(Step::Continue)
}
