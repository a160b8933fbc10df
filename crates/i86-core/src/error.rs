use thiserror::Error;

use crate::proxy::CodeAddress;

/// Faults raised while decoding or executing guest code.
///
/// None of these are recovered by the run loop: the first error ends the run
/// and is returned to whoever launched the program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// No decoder case matches the byte sequence at `address`.
    #[error("unhandled byte code {code:#04X} at {address}")]
    UnhandledByteCode { code: u32, address: CodeAddress },

    #[error("instruction at {address} exceeds 15 bytes")]
    InstructionTooLong { address: CodeAddress },

    /// An interrupt handler was asked for a sub-function it does not provide.
    #[error("invalid function {function:#04X} for interrupt {vector:#04X}")]
    InvalidFunction { vector: u8, function: u16 },

    #[error("interrupt {vector:#04X} has no handler and a null vector")]
    UnhandledInterrupt { vector: u8 },

    #[error("stack underflow at {ss:04X}:{sp:04X}")]
    StackUnderflow { ss: u16, sp: u16 },

    #[error("operand cannot be used for {operation}")]
    InvalidOperand { operation: &'static str },

    #[error("interrupt handler failed: {0}")]
    Handler(String),

    #[error("decode worker failed: {0}")]
    Worker(String),

    #[error("decode pipeline is stopped")]
    PipelineStopped,
}

pub type Result<T> = std::result::Result<T, AssemblyError>;
