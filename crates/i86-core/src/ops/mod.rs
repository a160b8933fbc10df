//! Instruction semantics.
//!
//! Each family lives in its own module; [`Instruction::execute`] only routes.

pub mod alu;
mod arith;
mod bits;
mod data;
mod flow;
pub mod shift;
mod stack;
mod string;
mod system;

use crate::cpu::Cpu;
use crate::error::Result;
use crate::opcode::{Instruction, Step};

impl Instruction {
    /// Executes against `cpu`. `length` is the encoded size, needed for
    /// return addresses.
    pub fn execute(&self, cpu: &mut Cpu, length: u8) -> Result<Step> {
        match self {
            Instruction::Alu { op, dst, src } => arith::alu(cpu, *op, dst, src),
            Instruction::Test { dst, src } => arith::test(cpu, dst, src),
            Instruction::Unary { op, dst } => arith::unary(cpu, *op, dst),
            Instruction::MulDiv { op, src } => arith::mul_div(cpu, *op, src),
            Instruction::ImulTruncate { dst, src, factor } => arith::imul_truncate(cpu, dst, src, factor),
            Instruction::Shift { op, dst, count } => shift::shift(cpu, *op, dst, count),
            Instruction::DoubleShift { left, dst, src, count } => shift::double_shift(cpu, *left, dst, src, count),
            Instruction::Bit { op, base, offset } => bits::bit_test(cpu, *op, base, offset),
            Instruction::BitScan { reverse, dst, src } => bits::bit_scan(cpu, *reverse, dst, src),
            Instruction::SetCc { cond, dst } => bits::set_cc(cpu, *cond, dst),
            Instruction::Bcd(op) => arith::bcd(cpu, *op),
            Instruction::Aam(base) => arith::aam(cpu, *base),
            Instruction::Aad(base) => arith::aad(cpu, *base),
            Instruction::Salc => arith::salc(cpu),
            Instruction::ExtendAccumulator(width) => arith::extend_accumulator(cpu, *width),
            Instruction::ExtendIntoDx(width) => arith::extend_into_dx(cpu, *width),

            Instruction::Mov { dst, src } => data::mov(cpu, dst, src),
            Instruction::MovExtend { signed, dst, src } => data::mov_extend(cpu, *signed, dst, src),
            Instruction::Xchg { a, b } => data::xchg(cpu, a, b),
            Instruction::Lea { dst, src } => data::lea(cpu, dst, src),
            Instruction::LoadFarPointer { segment, dst, src } => data::load_far_pointer(cpu, *segment, dst, src),
            Instruction::Xlat { segment, addr } => data::xlat(cpu, *segment, *addr),
            Instruction::Lahf => data::lahf(cpu),
            Instruction::Sahf => data::sahf(cpu),
            Instruction::In { dst, port } => data::port_in(cpu, dst, port),
            Instruction::Out { port, src } => data::port_out(cpu, port, src),

            Instruction::Push(src) => stack::push(cpu, src),
            Instruction::Pop(dst) => stack::pop(cpu, dst),
            Instruction::PushAll(width) => stack::push_all(cpu, *width),
            Instruction::PopAll(width) => stack::pop_all(cpu, *width),
            Instruction::PushFlags(width) => stack::push_flags(cpu, *width),
            Instruction::PopFlags(width) => stack::pop_flags(cpu, *width),
            Instruction::Enter { size, level, width } => stack::enter(cpu, *size, *level, *width),
            Instruction::Leave(width) => stack::leave(cpu, *width),

            Instruction::String { op, width, segment, addr } => string::string(cpu, *op, *width, *segment, *addr),
            Instruction::Repeat { mode, inner } => string::repeat(cpu, *mode, inner, length),

            Instruction::Jump(target) => flow::jump(cpu, target, length),
            Instruction::Call { target, width } => flow::call(cpu, target, *width, length),
            Instruction::Branch { cond, target } => flow::branch(cpu, *cond, *target),
            Instruction::Loop { kind, target, addr } => flow::loop_branch(cpu, *kind, *target, *addr),
            Instruction::Return { far, release, width } => flow::ret(cpu, *far, *release, *width),
            Instruction::InterruptReturn(width) => cpu.interrupt_return(*width),
            Instruction::Interrupt(vector) => flow::interrupt(cpu, *vector, length),
            Instruction::Breakpoint => flow::interrupt(cpu, 0x03, length),
            Instruction::InterruptOnOverflow => flow::interrupt_on_overflow(cpu, length),
            Instruction::Bound { index, bounds } => flow::bound(cpu, index, bounds),
            Instruction::Halt => flow::halt(cpu, length),

            Instruction::Flag(op) => system::flag(cpu, *op),
            Instruction::Nop | Instruction::Wait => Ok(Step::Continue),
            Instruction::Escape { opcode, modrm } => system::escape(cpu, *opcode, *modrm),
            Instruction::StoreMsw(dst) => system::store_msw(cpu, dst),
            Instruction::LoadMsw(src) => system::load_msw(cpu, src),
            Instruction::ClearTaskSwitched => system::clear_task_switched(cpu),
            Instruction::ReadCr0(dst) => system::read_cr0(cpu, *dst),
            Instruction::WriteCr0(src) => system::write_cr0(cpu, *src),
            Instruction::InvalidOpcode => system::invalid_opcode(cpu),
        }
    }
}
