//! The fetch/execute loop.

use std::sync::Arc;

use i86_memory::Memory;
use tracing::{debug, trace};

use crate::cache::DecodeCache;
use crate::config::{DecodeMode, EngineConfig};
use crate::cpu::Cpu;
use crate::decoder::Decoder;
use crate::error::Result;
use crate::flags::Flags;
use crate::interrupts::InterruptTable;
use crate::opcode::{OpCode, Step};
use crate::pipeline::{InstructionSource, PipelinedDecoder};
use crate::ports::PortIo;
use crate::proxy::CodeAddress;
use crate::regs::{SegReg, Width};
use crate::timer::{HostClock, StdHostClock, TimerGate};

/// Where and how a program is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramContext {
    pub code_segment: u16,
    pub data_segment: u16,
    pub entry: u16,
    /// Pushed onto the stack in order before the first instruction.
    pub arguments: Vec<u16>,
}

impl ProgramContext {
    pub fn new(code_segment: u16, data_segment: u16, entry: u16) -> Self {
        Self {
            code_segment,
            data_segment,
            entry,
            arguments: Vec::new(),
        }
    }

    /// Code and data in one segment, the way a `.COM` image runs.
    pub fn flat(segment: u16, entry: u16) -> Self {
        Self::new(segment, segment, entry)
    }

    pub fn with_argument(mut self, value: u16) -> Self {
        self.arguments.push(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Halted,
    InstructionLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub exit: ExitReason,
    pub instructions: u64,
}

/// Runs a conditional instruction and keeps the instruction source in step
/// with wherever it left CS:IP.
struct FlowControl<'a> {
    op: &'a OpCode,
}

impl<'a> FlowControl<'a> {
    fn new(op: &'a OpCode) -> Self {
        Self { op }
    }

    fn fall_through(&self) -> CodeAddress {
        let at = self.op.address();
        CodeAddress::new(at.segment, (at.offset + u32::from(self.op.length())) & 0xFFFF)
    }

    fn execute(&self, cpu: &mut Cpu, source: &mut dyn InstructionSource) -> Result<Step> {
        let step = self.op.execute(cpu)?;
        if step == Step::Jumped {
            let at = cpu.code_address();
            if at != self.fall_through() {
                debug!(from = %self.op.address(), to = %at, "control transfer");
                source.redirect(at);
            }
        }
        Ok(step)
    }
}

pub struct Engine {
    cpu: Cpu,
    config: EngineConfig,
    clock: Box<dyn HostClock>,
}

impl Engine {
    pub fn new(memory: Arc<dyn Memory>, config: EngineConfig) -> Self {
        let mut cpu = Cpu::new(memory);
        cpu.set_underflow_policy(config.stack_underflow);
        Self {
            cpu,
            config,
            clock: Box::new(StdHostClock::new()),
        }
    }

    pub fn with_clock<C: HostClock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_ports<P: PortIo + 'static>(mut self, ports: P) -> Self {
        self.cpu.set_ports(ports);
        self
    }

    pub fn with_interrupts(mut self, table: InterruptTable) -> Self {
        *self.cpu.interrupts_mut() = table;
        self
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptTable {
        self.cpu.interrupts_mut()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Runs `program` until the CPU halts, the instruction limit is reached,
    /// or an instruction fails.
    pub fn execute(&mut self, program: &ProgramContext) -> Result<RunSummary> {
        self.prepare(program);

        let mut decoder = Decoder::new(Arc::clone(self.cpu.memory()));
        if self.config.decode_cache {
            decoder = decoder.with_cache(DecodeCache::default());
        }
        decoder.reposition(self.cpu.code_address());

        match self.config.decode_mode {
            DecodeMode::Synchronous => self.run(&mut decoder),
            DecodeMode::Pipelined { depth } => {
                let mut pipeline = PipelinedDecoder::new(decoder, depth);
                pipeline.start()?;
                let outcome = self.run(&mut pipeline);
                let stopped = pipeline.stop();
                let summary = outcome?;
                stopped?;
                Ok(summary)
            }
        }
    }

    fn prepare(&mut self, program: &ProgramContext) {
        let cpu = &mut self.cpu;
        cpu.regs.set_seg(SegReg::Cs, program.code_segment);
        for segment in [SegReg::Ds, SegReg::Es, SegReg::Ss] {
            cpu.regs.set_seg(segment, program.data_segment);
        }
        cpu.regs.set_sp(self.config.initial_sp);
        cpu.mark_stack_top(self.config.initial_sp);
        for &argument in &program.arguments {
            cpu.push(u32::from(argument), Width::Word);
        }
        let base = cpu.regs.sp();
        cpu.mark_frame_base(base);
        cpu.regs.set_ip(program.entry);
        cpu.flags = Flags::RESET;
        cpu.resume();
        debug!(
            entry = %cpu.code_address(),
            ds = program.data_segment,
            arguments = program.arguments.len(),
            "program start"
        );
    }

    fn run(&mut self, source: &mut dyn InstructionSource) -> Result<RunSummary> {
        let timer = &self.config.timer;
        let mut gate = timer.enabled.then(|| TimerGate::new(timer.interval, self.clock.now()));
        let timer_vector = timer.vector;
        let mut instructions = 0u64;

        while self.cpu.is_active() {
            if self.config.instruction_limit.is_some_and(|limit| instructions >= limit) {
                debug!(instructions, "instruction limit reached");
                return Ok(RunSummary {
                    exit: ExitReason::InstructionLimit,
                    instructions,
                });
            }

            if let Some(gate) = gate.as_mut() {
                if gate.poll(self.clock.now(), self.cpu.flags.interrupts())
                    && self.cpu.can_deliver(timer_vector)
                {
                    let before = self.cpu.code_address();
                    trace!(target: "i86_core::exec", vector = timer_vector, "timer tick");
                    let ip = self.cpu.regs.eip();
                    self.cpu.interrupt(timer_vector, ip)?;
                    if !self.cpu.is_active() {
                        break;
                    }
                    if self.cpu.code_address() != before {
                        source.redirect(self.cpu.code_address());
                    }
                }
            }

            let op = source.next_opcode()?;
            let at = self.cpu.code_address();
            if op.address() != at {
                debug!(decoded = %op.address(), expected = %at, "stale decode, redirecting");
                source.redirect(at);
                continue;
            }
            if source.decodes_ahead() && !self.cpu.holds_code(&op) {
                debug!(%at, "code changed after decode, redirecting");
                source.redirect(at);
                continue;
            }

            trace!(target: "i86_core::exec", %at, instruction = ?op.instruction(), "execute");
            let step = if op.is_conditional() {
                FlowControl::new(&op).execute(&mut self.cpu, source)?
            } else {
                op.execute(&mut self.cpu)?
            };
            if step == Step::Continue {
                self.cpu.advance_ip(op.length());
            }
            instructions += 1;
        }

        debug!(instructions, at = %self.cpu.code_address(), "halted");
        Ok(RunSummary {
            exit: ExitReason::Halted,
            instructions,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cpu", &self.cpu)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
