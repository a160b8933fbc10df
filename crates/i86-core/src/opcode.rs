//! Decoded instructions.
//!
//! [`Instruction`] is the typed form of one decoded instruction; [`OpCode`]
//! wraps it with the facts the engine needs to run it (where it was decoded,
//! its raw bytes and length, and how it may redirect control flow).

use crate::cpu::Cpu;
use crate::error::Result;
use crate::flags::Flags;
use crate::operand::{MemoryRef, Operand};
use crate::proxy::{CodeAddress, Destination, FarPointer};
use crate::regs::{Reg32, SegReg, Width};

/// Two-operand ALU operations, in ModRM `reg` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    pub fn from_code(code: u8) -> AluOp {
        match code & 7 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }
}

/// Shift and rotate operations, in ModRM `reg` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sal,
    Sar,
}

impl ShiftOp {
    pub fn from_code(code: u8) -> ShiftOp {
        match code & 7 {
            0 => ShiftOp::Rol,
            1 => ShiftOp::Ror,
            2 => ShiftOp::Rcl,
            3 => ShiftOp::Rcr,
            4 => ShiftOp::Shl,
            5 => ShiftOp::Shr,
            6 => ShiftOp::Sal,
            _ => ShiftOp::Sar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Inc,
    Dec,
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulOp {
    Mul,
    Imul,
    Div,
    Idiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    Bt,
    Bts,
    Btr,
    Btc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BcdOp {
    Daa,
    Das,
    Aaa,
    Aas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagOp {
    Clc,
    Stc,
    Cmc,
    Cli,
    Sti,
    Cld,
    Std,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringOp {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
    Ins,
    Outs,
}

impl StringOp {
    /// CMPS and SCAS terminate a REPE/REPNE loop on ZF.
    pub fn tests_zero_flag(self) -> bool {
        matches!(self, StringOp::Cmps | StringOp::Scas)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepMode {
    /// `F3`: REP, or REPE for CMPS/SCAS.
    Repe,
    /// `F2`
    Repne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Loop,
    Loope,
    Loopne,
    Jcxz,
}

/// Address size in effect for an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrSize {
    A16,
    A32,
}

impl AddrSize {
    pub fn width(self) -> Width {
        match self {
            AddrSize::A16 => Width::Word,
            AddrSize::A32 => Width::Dword,
        }
    }
}

/// Condition codes in `Jcc`/`SETcc` low-nibble order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

impl Condition {
    pub fn from_code(code: u8) -> Condition {
        use Condition::*;
        [O, No, B, Ae, E, Ne, Be, A, S, Ns, P, Np, L, Ge, Le, G][usize::from(code & 0xF)]
    }

    pub fn evaluate(self, flags: &Flags) -> bool {
        let less = flags.sign() != flags.overflow();
        match self {
            Condition::O => flags.overflow(),
            Condition::No => !flags.overflow(),
            Condition::B => flags.carry(),
            Condition::Ae => !flags.carry(),
            Condition::E => flags.zero(),
            Condition::Ne => !flags.zero(),
            Condition::Be => flags.carry() || flags.zero(),
            Condition::A => !flags.carry() && !flags.zero(),
            Condition::S => flags.sign(),
            Condition::Ns => !flags.sign(),
            Condition::P => flags.parity(),
            Condition::Np => !flags.parity(),
            Condition::L => less,
            Condition::Ge => !less,
            Condition::Le => flags.zero() || less,
            Condition::G => !flags.zero() && !less,
        }
    }
}

/// Jump and call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Absolute offset in the current code segment, resolved at decode time.
    Near(u32),
    Far(FarPointer),
    /// Offset read from a register or memory at execution time.
    Indirect(Operand),
    /// `offset, segment` pair read from memory at execution time.
    IndirectFar(MemoryRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    Alu { op: AluOp, dst: Operand, src: Operand },
    Test { dst: Operand, src: Operand },
    Unary { op: UnaryOp, dst: Operand },
    /// One-operand MUL/IMUL/DIV/IDIV on the accumulator.
    MulDiv { op: MulOp, src: Operand },
    /// Two- and three-operand IMUL, truncated to the destination width.
    ImulTruncate { dst: Operand, src: Operand, factor: Operand },
    Shift { op: ShiftOp, dst: Operand, count: Operand },
    DoubleShift { left: bool, dst: Operand, src: Operand, count: Operand },
    Bit { op: BitOp, base: Operand, offset: Operand },
    BitScan { reverse: bool, dst: Operand, src: Operand },
    SetCc { cond: Condition, dst: Operand },
    Bcd(BcdOp),
    Aam(u8),
    Aad(u8),
    Salc,
    /// CBW/CWDE.
    ExtendAccumulator(Width),
    /// CWD/CDQ.
    ExtendIntoDx(Width),

    Mov { dst: Operand, src: Operand },
    MovExtend { signed: bool, dst: Operand, src: Operand },
    Xchg { a: Operand, b: Operand },
    Lea { dst: Operand, src: MemoryRef },
    LoadFarPointer { segment: SegReg, dst: Operand, src: MemoryRef },
    Xlat { segment: SegReg, addr: AddrSize },
    Lahf,
    Sahf,
    In { dst: Operand, port: Operand },
    Out { port: Operand, src: Operand },

    Push(Operand),
    Pop(Operand),
    PushAll(Width),
    PopAll(Width),
    PushFlags(Width),
    PopFlags(Width),
    Enter { size: u16, level: u8, width: Width },
    Leave(Width),

    String { op: StringOp, width: Width, segment: SegReg, addr: AddrSize },
    Repeat { mode: RepMode, inner: Box<Instruction> },

    Jump(Target),
    Call { target: Target, width: Width },
    Branch { cond: Condition, target: u32 },
    Loop { kind: LoopKind, target: u32, addr: AddrSize },
    Return { far: bool, release: u16, width: Width },
    InterruptReturn(Width),
    Interrupt(u8),
    /// INT3
    Breakpoint,
    /// INTO
    InterruptOnOverflow,
    Bound { index: Operand, bounds: MemoryRef },

    Flag(FlagOp),
    Halt,
    Nop,
    Wait,
    /// FPU escape (D8-DF); decoded for length only.
    Escape { opcode: u8, modrm: u8 },
    StoreMsw(Operand),
    LoadMsw(Operand),
    ClearTaskSwitched,
    ReadCr0(Reg32),
    WriteCr0(Reg32),
    /// UD2
    InvalidOpcode,
}

impl Instruction {
    /// Destination of an unconditional, statically known transfer.
    pub fn forced_destination(&self) -> Option<Destination> {
        match self {
            Instruction::Jump(Target::Near(offset))
            | Instruction::Call { target: Target::Near(offset), .. } => Some(Destination::Near(*offset)),
            Instruction::Jump(Target::Far(ptr)) | Instruction::Call { target: Target::Far(ptr), .. } => {
                Some(Destination::Far(*ptr))
            }
            _ => None,
        }
    }

    /// True for instructions whose effect on CS:IP is only known at execution time.
    pub fn is_conditional(&self) -> bool {
        match self {
            Instruction::Jump(target) | Instruction::Call { target, .. } => {
                matches!(target, Target::Indirect(_) | Target::IndirectFar(_))
            }
            Instruction::MulDiv { op, .. } => matches!(op, MulOp::Div | MulOp::Idiv),
            Instruction::Branch { .. }
            | Instruction::Loop { .. }
            | Instruction::Return { .. }
            | Instruction::InterruptReturn(_)
            | Instruction::Interrupt(_)
            | Instruction::Breakpoint
            | Instruction::InterruptOnOverflow
            | Instruction::Bound { .. }
            | Instruction::Aam(_)
            | Instruction::InvalidOpcode => true,
            _ => false,
        }
    }
}

/// Outcome of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// IP should advance past the instruction.
    Continue,
    /// The instruction set CS:IP itself.
    Jumped,
    /// The CPU stopped.
    Halted,
}

impl Step {
    pub fn ip_overridden(self) -> bool {
        !matches!(self, Step::Continue)
    }
}

/// A decoded instruction ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpCode {
    instruction: Instruction,
    address: CodeAddress,
    code: u128,
    length: u8,
    conditional: bool,
    forced_redirect: bool,
}

impl OpCode {
    pub fn new(instruction: Instruction, address: CodeAddress, code: u128, length: u8) -> Self {
        let conditional = instruction.is_conditional();
        let forced_redirect = instruction.forced_destination().is_some();
        Self {
            instruction,
            address,
            code,
            length,
            conditional,
            forced_redirect,
        }
    }

    pub fn execute(&self, cpu: &mut Cpu) -> Result<Step> {
        self.instruction.execute(cpu, self.length)
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Where the instruction was decoded.
    pub fn address(&self) -> CodeAddress {
        self.address
    }

    pub fn is_conditional(&self) -> bool {
        self.conditional
    }

    pub fn is_forced_redirect(&self) -> bool {
        self.forced_redirect
    }

    pub fn forced_destination(&self) -> Option<Destination> {
        self.instruction.forced_destination()
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn set_length(&mut self, length: u8) {
        self.length = length;
    }

    /// Raw instruction bytes, first byte in the low bits.
    pub fn instruction_code(&self) -> u128 {
        self.code
    }

    pub fn set_instruction_code(&mut self, code: u128) {
        self.code = code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_follow_flag_predicates() {
        let mut flags = Flags::RESET;
        flags.set_sign(true);
        assert!(Condition::L.evaluate(&flags));
        assert!(!Condition::Ge.evaluate(&flags));
        flags.set_overflow(true);
        assert!(Condition::Ge.evaluate(&flags));
        assert!(Condition::G.evaluate(&flags));
        flags.set_zero(true);
        assert!(Condition::Le.evaluate(&flags));
        assert!(Condition::Be.evaluate(&flags));
        assert!(!Condition::A.evaluate(&flags));
        assert_eq!(Condition::from_code(0x74), Condition::E);
        assert_eq!(Condition::from_code(0x8F), Condition::G);
    }

    #[test]
    fn classification() {
        let jmp = OpCode::new(
            Instruction::Jump(Target::Near(0x0200)),
            CodeAddress::new(0x1000, 0x100),
            0x00FD_E9,
            3,
        );
        assert!(jmp.is_forced_redirect());
        assert!(!jmp.is_conditional());
        assert_eq!(jmp.forced_destination(), Some(Destination::Near(0x0200)));

        let jz = OpCode::new(
            Instruction::Branch { cond: Condition::E, target: 0x0110 },
            CodeAddress::new(0x1000, 0x100),
            0x0E74,
            2,
        );
        assert!(jz.is_conditional());
        assert!(!jz.is_forced_redirect());

        let mov = OpCode::new(Instruction::Nop, CodeAddress::default(), 0x90, 1);
        assert!(!mov.is_conditional() && !mov.is_forced_redirect());
        assert!(Step::Jumped.ip_overridden());
        assert!(!Step::Continue.ip_overridden());
    }
}
