//! Flag computation shared by the arithmetic and logic instructions.

use crate::flags::Flags;
use crate::regs::Width;

fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

/// Sets ZF, SF and PF from `result`.
pub fn set_result_flags(flags: &mut Flags, result: u32, width: Width) {
    let result = width.truncate(result);
    flags.set(Flags::ZF, result == 0);
    flags.set(Flags::SF, result & width.sign_bit() != 0);
    flags.set(Flags::PF, parity(result as u8));
}

pub fn add_with_flags(flags: &mut Flags, dest: u32, src: u32, carry_in: bool, width: Width) -> u32 {
    let mask = width.mask();
    let dest = dest & mask;
    let src = src & mask;
    let full = u64::from(dest) + u64::from(src) + u64::from(carry_in);
    let result = (full as u32) & mask;

    let sb = width.sign_bit();
    flags.set(Flags::CF, full > u64::from(mask));
    flags.set(Flags::OF, (dest ^ result) & (src ^ result) & sb != 0);
    flags.set(Flags::AF, (dest ^ src ^ result) & 0x10 != 0);
    set_result_flags(flags, result, width);
    result
}

pub fn sub_with_flags(flags: &mut Flags, dest: u32, src: u32, borrow_in: bool, width: Width) -> u32 {
    let mask = width.mask();
    let dest = dest & mask;
    let src = src & mask;
    let subtrahend = u64::from(src) + u64::from(borrow_in);
    let result = (u64::from(dest).wrapping_sub(subtrahend) as u32) & mask;

    let sb = width.sign_bit();
    flags.set(Flags::CF, u64::from(dest) < subtrahend);
    flags.set(Flags::OF, (dest ^ src) & (dest ^ result) & sb != 0);
    flags.set(Flags::AF, (dest ^ src ^ result) & 0x10 != 0);
    set_result_flags(flags, result, width);
    result
}

/// AND/OR/XOR/TEST: CF and OF cleared, AF left clear.
pub fn logic_with_flags(flags: &mut Flags, result: u32, width: Width) -> u32 {
    let result = width.truncate(result);
    flags.remove(Flags::CF | Flags::OF | Flags::AF);
    set_result_flags(flags, result, width);
    result
}

/// INC and DEC leave CF untouched.
pub fn inc_dec_with_flags(flags: &mut Flags, dest: u32, decrement: bool, width: Width) -> u32 {
    let carry = flags.carry();
    let result = if decrement {
        sub_with_flags(flags, dest, 1, false, width)
    } else {
        add_with_flags(flags, dest, 1, false, width)
    };
    flags.set_carry(carry);
    result
}
