//! CPU state and the control-flow primitives instructions are built from.

use std::fmt;
use std::sync::Arc;

use i86_memory::Memory;
use tracing::{debug, warn};

use crate::config::UnderflowPolicy;
use crate::error::{AssemblyError, Result};
use crate::flags::{Flags, MachineStatus};
use crate::interrupts::{InterruptHandler, InterruptTable};
use crate::opcode::{OpCode, Step};
use crate::operand::MemoryRef;
use crate::ports::{NullPorts, PortIo};
use crate::proxy::{CodeAddress, Destination, FarPointer, MemoryProxy};
use crate::regs::{Registers, SegReg, Width};

/// Processor exceptions raised by instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// #DE: division by zero or quotient overflow.
    DivideError,
    /// #BR: `BOUND` index out of range.
    BoundRange,
    /// #UD: `UD2`.
    InvalidOpcode,
}

impl Fault {
    pub const fn vector(self) -> u8 {
        match self {
            Fault::DivideError => 0x00,
            Fault::BoundRange => 0x05,
            Fault::InvalidOpcode => 0x06,
        }
    }
}

pub struct Cpu {
    pub regs: Registers,
    pub flags: Flags,
    pub msw: MachineStatus,
    bus: MemoryProxy,
    ports: Box<dyn PortIo>,
    interrupts: InterruptTable,
    underflow: UnderflowPolicy,
    /// SP with nothing pushed; popping past it underflows.
    stack_top: Option<u16>,
    /// SP right after the program's arguments; a return from here halts.
    frame_base: Option<u16>,
    /// SP of each native interrupt bracket, innermost last.
    brackets: Vec<u16>,
    halted: bool,
}

impl Cpu {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self {
            regs: Registers::new(),
            flags: Flags::RESET,
            msw: MachineStatus::RESET,
            bus: MemoryProxy::new(memory),
            ports: Box::new(NullPorts),
            interrupts: InterruptTable::new(),
            underflow: UnderflowPolicy::default(),
            stack_top: None,
            frame_base: None,
            brackets: Vec::new(),
            halted: false,
        }
    }

    pub fn with_ports<P: PortIo + 'static>(mut self, ports: P) -> Self {
        self.ports = Box::new(ports);
        self
    }

    pub fn with_interrupts(mut self, table: InterruptTable) -> Self {
        self.interrupts = table;
        self
    }

    pub fn set_ports<P: PortIo + 'static>(&mut self, ports: P) {
        self.ports = Box::new(ports);
    }

    pub fn interrupts(&self) -> &InterruptTable {
        &self.interrupts
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptTable {
        &mut self.interrupts
    }

    pub fn set_underflow_policy(&mut self, policy: UnderflowPolicy) {
        self.underflow = policy;
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        self.bus.memory()
    }

    // Run state.

    pub fn is_active(&self) -> bool {
        !self.halted
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn resume(&mut self) {
        self.halted = false;
    }

    pub fn code_address(&self) -> CodeAddress {
        CodeAddress::new(self.regs.seg(SegReg::Cs), self.regs.eip())
    }

    /// True when memory still holds the bytes `op` was decoded from.
    pub fn holds_code(&self, op: &OpCode) -> bool {
        self.bus
            .matches(op.address(), op.instruction_code(), usize::from(op.length()))
    }

    /// Moves IP past an instruction that did not redirect.
    pub fn advance_ip(&mut self, length: u8) {
        let next = self.regs.ip().wrapping_add(u16::from(length));
        self.regs.set_ip(next);
    }

    // Memory and ports.

    pub fn read_memory(&self, mem: &MemoryRef) -> u32 {
        let offset = mem.offset(&self.regs);
        self.read_at(mem.segment, offset, mem.width)
    }

    pub fn write_memory(&self, mem: &MemoryRef, value: u32) {
        let offset = mem.offset(&self.regs);
        self.write_at(mem.segment, offset, mem.width, value);
    }

    pub fn read_at(&self, segment: SegReg, offset: u32, width: Width) -> u32 {
        self.bus.read(self.regs.seg(segment), offset, width)
    }

    pub fn write_at(&self, segment: SegReg, offset: u32, width: Width, value: u32) {
        self.bus.write(self.regs.seg(segment), offset, width, value);
    }

    pub fn port_in(&mut self, port: u16, width: Width) -> u32 {
        width.truncate(self.ports.read(port, width))
    }

    pub fn port_out(&mut self, port: u16, width: Width, value: u32) {
        self.ports.write(port, width, width.truncate(value));
    }

    // Stack.

    /// Records the empty-stack SP (underflow boundary).
    pub fn mark_stack_top(&mut self, sp: u16) {
        self.stack_top = Some(sp);
    }

    /// Records the SP at which a return has nothing to return to.
    pub fn mark_frame_base(&mut self, sp: u16) {
        self.frame_base = Some(sp);
    }

    pub fn is_stack_empty(&self) -> bool {
        self.frame_base.is_some_and(|base| self.regs.sp() >= base)
    }

    pub fn push(&mut self, value: u32, width: Width) {
        let sp = self.regs.sp().wrapping_sub(width.bytes() as u16);
        self.regs.set_sp(sp);
        self.write_at(SegReg::Ss, u32::from(sp), width, value);
    }

    pub fn pop(&mut self, width: Width) -> Result<u32> {
        let sp = self.regs.sp();
        if let Some(top) = self.stack_top {
            if u32::from(sp) + width.bytes() > u32::from(top) {
                let ss = self.regs.seg(SegReg::Ss);
                match self.underflow {
                    UnderflowPolicy::Fault => return Err(AssemblyError::StackUnderflow { ss, sp }),
                    UnderflowPolicy::Warn => warn!(ss, sp, at = %self.code_address(), "stack underflow"),
                }
            }
        }
        let value = self.read_at(SegReg::Ss, u32::from(sp), width);
        self.regs.set_sp(sp.wrapping_add(width.bytes() as u16));
        Ok(value)
    }

    /// Drops `bytes` from the top of the stack (`RET imm16`).
    pub fn release_stack(&mut self, bytes: u16) {
        let sp = self.regs.sp().wrapping_add(bytes);
        self.regs.set_sp(sp);
    }

    // Control flow.

    /// Transfers control, optionally saving a 16-bit return point first.
    pub fn jump_to(&mut self, length: u8, destination: Destination, save_point: bool) {
        self.jump_to_sized(length, destination, save_point, Width::Word);
    }

    /// Like [`jump_to`](Self::jump_to) with the return point pushed at `width`.
    pub fn jump_to_sized(&mut self, length: u8, destination: Destination, save_point: bool, width: Width) {
        let return_ip = width.truncate(self.regs.eip().wrapping_add(u32::from(length)));
        match destination {
            Destination::Near(offset) => {
                if save_point {
                    self.push(return_ip, width);
                }
                self.regs.set_eip(offset);
            }
            Destination::Far(ptr) => {
                if save_point {
                    let cs = self.regs.seg(SegReg::Cs);
                    self.push(u32::from(cs), width);
                    self.push(return_ip, width);
                }
                self.regs.set_seg(SegReg::Cs, ptr.segment);
                self.regs.set_eip(ptr.offset);
            }
        }
    }

    pub fn return_near(&mut self, release: u16, width: Width) -> Result<Step> {
        if self.returns_to_nothing() {
            return Ok(Step::Halted);
        }
        let ip = self.pop(width)?;
        self.release_stack(release);
        self.regs.set_eip(ip);
        Ok(Step::Jumped)
    }

    pub fn return_far(&mut self, release: u16, width: Width) -> Result<Step> {
        if self.returns_to_nothing() {
            return Ok(Step::Halted);
        }
        let ip = self.pop(width)?;
        let cs = self.pop(width)?;
        self.release_stack(release);
        self.regs.set_seg(SegReg::Cs, cs as u16);
        self.regs.set_eip(ip);
        Ok(Step::Jumped)
    }

    pub fn interrupt_return(&mut self, width: Width) -> Result<Step> {
        let ip = self.pop(width)?;
        let cs = self.pop(width)?;
        let flags = self.pop(width)?;
        self.regs.set_seg(SegReg::Cs, cs as u16);
        self.regs.set_eip(ip);
        self.flags.load(flags, width);
        Ok(Step::Jumped)
    }

    fn returns_to_nothing(&mut self) -> bool {
        if self.is_stack_empty() {
            debug!(at = %self.code_address(), "return with empty program frame, halting");
            self.halt();
            true
        } else {
            false
        }
    }

    // Interrupts.

    /// Reads an entry of the real-mode interrupt vector table.
    pub fn vector(&self, vector: u8) -> FarPointer {
        let slot = u32::from(vector) * 4;
        let memory = self.memory();
        FarPointer::new(memory.get_word(0, slot + 2), u32::from(memory.get_word(0, slot)))
    }

    pub fn set_vector(&self, vector: u8, target: FarPointer) {
        let slot = u32::from(vector) * 4;
        let memory = self.memory();
        memory.set_word(0, slot, target.offset as u16);
        memory.set_word(0, slot + 2, target.segment);
    }

    /// True when `vector` has a native handler or a non-null IVT entry.
    pub fn can_deliver(&self, vector: u8) -> bool {
        self.interrupts.contains(vector) || !self.vector(vector).is_null()
    }

    /// Raises interrupt `vector` with `return_ip` as the resume point.
    ///
    /// A native handler runs to completion inside [`invoke_interrupt`]; the
    /// caller then continues as if the interrupt were an ordinary instruction.
    /// Otherwise control moves to the guest's IVT entry and returns through
    /// `IRET`.
    ///
    /// [`invoke_interrupt`]: Self::invoke_interrupt
    pub fn interrupt(&mut self, vector: u8, return_ip: u32) -> Result<Step> {
        let target = self.vector(vector);
        if let Some(handler) = self.interrupts.get(vector) {
            debug!(vector, "native interrupt");
            self.invoke_interrupt(target, handler.as_ref())?;
            return Ok(Step::Continue);
        }
        if target.is_null() {
            return Err(AssemblyError::UnhandledInterrupt { vector });
        }
        debug!(vector, %target, "vectoring interrupt to guest");
        self.push_interrupt_frame(return_ip);
        self.regs.set_seg(SegReg::Cs, target.segment);
        self.regs.set_eip(target.offset);
        Ok(Step::Jumped)
    }

    /// Synchronous interrupt bracket around a native handler.
    ///
    /// FLAGS, CS and IP are pushed, IF and TF cleared and CS:IP set to
    /// `target` while the handler runs; afterwards IP, CS and FLAGS are popped
    /// back, so any flag the handler wants to report must be patched into the
    /// stacked image.
    pub fn invoke_interrupt(&mut self, target: FarPointer, handler: &dyn InterruptHandler) -> Result<()> {
        let ip = self.regs.eip();
        self.push_interrupt_frame(ip);
        self.brackets.push(self.regs.sp());
        self.regs.set_seg(SegReg::Cs, target.segment);
        self.regs.set_eip(target.offset);

        let outcome = handler.process(self);

        self.brackets.pop();
        let ip = self.pop(Width::Word)?;
        let cs = self.pop(Width::Word)?;
        let flags = self.pop(Width::Word)?;
        self.regs.set_seg(SegReg::Cs, cs as u16);
        self.regs.set_eip(ip);
        self.flags.load(flags, Width::Word);
        outcome
    }

    /// Sets or clears `flag` in the FLAGS image the current bracket restores.
    ///
    /// Outside a native handler this updates the live flags instead.
    pub fn set_return_flag(&mut self, flag: Flags, value: bool) {
        match self.brackets.last() {
            Some(&sp) => {
                let slot = u32::from(sp.wrapping_add(4));
                let mut image = Flags::from_bits_retain(self.read_at(SegReg::Ss, slot, Width::Word));
                image.set(flag, value);
                self.write_at(SegReg::Ss, slot, Width::Word, image.bits());
            }
            None => self.flags.set(flag, value),
        }
    }

    /// Delivers a processor exception for the instruction at CS:IP.
    ///
    /// Without a native handler or a guest vector the fault is logged and the
    /// instruction completes as a no-op.
    pub fn raise_fault(&mut self, fault: Fault) -> Result<Step> {
        let vector = fault.vector();
        if !self.can_deliver(vector) {
            warn!(?fault, at = %self.code_address(), "unhandled processor fault ignored");
            return Ok(Step::Continue);
        }
        let ip = self.regs.eip();
        self.interrupt(vector, ip)
    }

    fn push_interrupt_frame(&mut self, return_ip: u32) {
        let image = self.flags.image(Width::Word);
        let cs = self.regs.seg(SegReg::Cs);
        self.push(image, Width::Word);
        self.push(u32::from(cs), Width::Word);
        self.push(return_ip, Width::Word);
        self.flags.set_interrupts(false);
        self.flags.set_trap(false);
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("regs", &self.regs)
            .field("flags", &self.flags)
            .field("msw", &self.msw)
            .field("interrupts", &self.interrupts)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Reg16;
    use i86_memory::RealModeMemory;
    use proptest::prelude::*;

    fn cpu() -> Cpu {
        let mut cpu = Cpu::new(Arc::new(RealModeMemory::new()));
        cpu.regs.set_seg(SegReg::Ss, 0x2000);
        cpu.regs.set_seg(SegReg::Cs, 0x1000);
        cpu.regs.set_sp(0xFFFE);
        cpu.mark_stack_top(0xFFFE);
        cpu
    }

    #[test]
    fn push_then_pop_restores_sp() {
        let mut cpu = cpu();
        cpu.push(0x1234, Width::Word);
        assert_eq!(cpu.regs.sp(), 0xFFFC);
        assert_eq!(cpu.memory().get_word(0x2000, 0xFFFC), 0x1234);
        assert_eq!(cpu.pop(Width::Word).unwrap(), 0x1234);
        assert_eq!(cpu.regs.sp(), 0xFFFE);
    }

    #[test]
    fn underflow_policy() {
        let mut cpu = cpu();
        assert!(cpu.pop(Width::Word).is_ok());
        assert_eq!(cpu.regs.sp(), 0x0000);

        let mut cpu = self::cpu();
        cpu.set_underflow_policy(UnderflowPolicy::Fault);
        assert_eq!(
            cpu.pop(Width::Word),
            Err(AssemblyError::StackUnderflow { ss: 0x2000, sp: 0xFFFE })
        );
        cpu.push(1, Width::Word);
        assert!(cpu.pop(Width::Dword).is_err());
    }

    #[test]
    fn far_call_pushes_cs_then_return_ip() {
        let mut cpu = cpu();
        cpu.regs.set_ip(0x0100);
        cpu.jump_to(5, Destination::Far(FarPointer::new(0x3000, 0x0010)), true);
        assert_eq!(cpu.code_address(), CodeAddress::new(0x3000, 0x0010));
        assert_eq!(cpu.pop(Width::Word).unwrap(), 0x0105);
        assert_eq!(cpu.pop(Width::Word).unwrap(), 0x1000);
    }

    #[test]
    fn return_with_empty_frame_halts() {
        let mut cpu = cpu();
        cpu.push(0xAAAA, Width::Word);
        cpu.mark_frame_base(cpu.regs.sp());
        assert_eq!(cpu.return_near(0, Width::Word).unwrap(), Step::Halted);
        assert!(!cpu.is_active());
        assert_eq!(cpu.regs.sp(), 0xFFFC);
    }

    #[test]
    fn ret_imm_releases_after_popping_return_address() {
        let mut cpu = cpu();
        cpu.push(0x0001, Width::Word);
        cpu.push(0x0002, Width::Word);
        cpu.push(0x0300, Width::Word);
        assert_eq!(cpu.return_near(4, Width::Word).unwrap(), Step::Jumped);
        assert_eq!(cpu.regs.ip(), 0x0300);
        assert_eq!(cpu.regs.sp(), 0xFFFE);
    }

    #[test]
    fn native_interrupt_bracket_restores_state_and_patches_flags() {
        let mut cpu = cpu();
        cpu.regs.set_ip(0x0123);
        cpu.flags.set_carry(true);
        cpu.interrupts_mut().register_fn(0x21, |cpu| {
            assert!(!cpu.flags.interrupts());
            assert_eq!(cpu.code_address(), CodeAddress::new(0xF000, 0x1000));
            cpu.regs.set16(Reg16::Ax, 0x4C00);
            cpu.set_return_flag(Flags::CF, false);
            Ok(())
        });
        cpu.set_vector(0x21, FarPointer::new(0xF000, 0x1000));

        assert_eq!(cpu.interrupt(0x21, 0x0125).unwrap(), Step::Continue);
        assert_eq!(cpu.code_address(), CodeAddress::new(0x1000, 0x0123));
        assert_eq!(cpu.regs.sp(), 0xFFFE);
        assert!(cpu.flags.interrupts());
        assert!(!cpu.flags.carry());
        assert_eq!(cpu.regs.get16(Reg16::Ax), 0x4C00);
    }

    #[test]
    fn guest_vectoring_and_iret() {
        let mut cpu = cpu();
        cpu.regs.set_ip(0x0200);
        cpu.set_vector(0x08, FarPointer::new(0x0070, 0x0000));
        assert_eq!(cpu.interrupt(0x08, 0x0200).unwrap(), Step::Jumped);
        assert_eq!(cpu.code_address(), CodeAddress::new(0x0070, 0x0000));
        assert!(!cpu.flags.interrupts());
        assert_eq!(cpu.regs.sp(), 0xFFF8);

        assert_eq!(cpu.interrupt_return(Width::Word).unwrap(), Step::Jumped);
        assert_eq!(cpu.code_address(), CodeAddress::new(0x1000, 0x0200));
        assert_eq!(cpu.flags, Flags::RESET);
        assert_eq!(cpu.regs.sp(), 0xFFFE);
    }

    #[test]
    fn interrupt_without_any_handler_is_an_error() {
        let mut cpu = cpu();
        assert_eq!(
            cpu.interrupt(0x60, 0),
            Err(AssemblyError::UnhandledInterrupt { vector: 0x60 })
        );
    }

    #[test]
    fn undeliverable_fault_is_ignored() {
        let mut cpu = cpu();
        assert_eq!(cpu.raise_fault(Fault::DivideError).unwrap(), Step::Continue);
        assert_eq!(cpu.regs.sp(), 0xFFFE);
    }

    proptest! {
        #[test]
        fn stack_is_lifo(values in proptest::collection::vec(any::<u16>(), 1..64)) {
            let mut cpu = cpu();
            for &v in &values {
                cpu.push(u32::from(v), Width::Word);
            }
            for &v in values.iter().rev() {
                prop_assert_eq!(cpu.pop(Width::Word).unwrap(), u32::from(v));
            }
            prop_assert_eq!(cpu.regs.sp(), 0xFFFE);
        }
    }
}
