//! Real-mode 80x86 instruction decoding and execution.
//!
//! [`Engine`] loads CS:IP from a [`ProgramContext`] and runs a fetch/execute
//! loop over a shared [`i86_memory::Memory`]. Instructions come either from a
//! [`Decoder`] on the execution thread or from a [`PipelinedDecoder`] that
//! decodes ahead on a worker thread; in both cases decoding follows direct
//! jumps and calls, and every other control transfer redirects the source.
//!
//! Software interrupts are served by native [`InterruptHandler`]s when one is
//! registered for the vector, and by guest code through the interrupt vector
//! table otherwise.

#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod flags;
pub mod interrupts;
pub mod opcode;
pub mod operand;
pub mod ops;
pub mod pipeline;
pub mod ports;
pub mod proxy;
pub mod regs;
pub mod timer;

pub use i86_memory;

pub use cache::{CacheStats, DecodeCache};
pub use config::{DecodeMode, EngineConfig, TimerConfig, UnderflowPolicy};
pub use cpu::{Cpu, Fault};
pub use decoder::Decoder;
pub use engine::{Engine, ExitReason, ProgramContext, RunSummary};
pub use error::{AssemblyError, Result};
pub use flags::{Flags, MachineStatus};
pub use interrupts::{InterruptHandler, InterruptTable};
pub use opcode::{Instruction, OpCode, Step};
pub use pipeline::{InstructionSource, PipelinedDecoder};
pub use ports::{NullPorts, PortIo};
pub use proxy::{CodeAddress, Destination, FarPointer, MemoryProxy};
pub use regs::{Reg16, Reg32, Reg8, Register, Registers, SegReg, Width};
pub use timer::{FakeHostClock, HostClock, StdHostClock, TimerGate};
