#![allow(dead_code)]

use std::sync::Arc;

use i86_core::i86_memory::{Memory, RealModeMemory};
use i86_core::{
    AssemblyError, Engine, EngineConfig, FarPointer, ProgramContext, Registers, RunSummary, TimerConfig,
};
use tracing_subscriber::EnvFilter;

pub const CODE_SEGMENT: u16 = 0x1000;
pub const ENTRY: u16 = 0x0100;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic defaults: no timer, bounded run length.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        timer: TimerConfig {
            enabled: false,
            ..TimerConfig::default()
        },
        instruction_limit: Some(100_000),
        ..EngineConfig::default()
    }
}

/// A flat `.COM` style machine with `code` loaded at `1000:0100`.
pub struct Machine {
    pub memory: Arc<RealModeMemory>,
    pub engine: Engine,
    pub program: ProgramContext,
}

impl Machine {
    pub fn new(code: &[u8]) -> Self {
        Self::with_config(code, test_config())
    }

    pub fn with_config(code: &[u8], config: EngineConfig) -> Self {
        init_tracing();
        let memory = Arc::new(RealModeMemory::new());
        memory
            .load(CODE_SEGMENT, u32::from(ENTRY), code)
            .expect("program fits in memory");
        let engine = Engine::new(memory.clone(), config);
        Self {
            memory,
            engine,
            program: ProgramContext::flat(CODE_SEGMENT, ENTRY),
        }
    }

    /// Places `bytes` at `CODE_SEGMENT:offset`.
    pub fn poke(&self, offset: u16, bytes: &[u8]) {
        self.memory.set_bytes(CODE_SEGMENT, u32::from(offset), bytes);
    }

    pub fn set_vector(&self, vector: u8, offset: u16) {
        self.engine
            .cpu()
            .set_vector(vector, FarPointer::new(CODE_SEGMENT, u32::from(offset)));
    }

    pub fn try_run(&mut self) -> Result<RunSummary, AssemblyError> {
        self.engine.execute(&self.program)
    }

    pub fn run(&mut self) -> RunSummary {
        self.try_run().expect("program runs to completion")
    }

    pub fn regs(&self) -> &Registers {
        &self.engine.cpu().regs
    }

    pub fn byte(&self, offset: u16) -> u8 {
        self.memory.get_byte(CODE_SEGMENT, u32::from(offset))
    }

    pub fn word(&self, offset: u16) -> u16 {
        self.memory.get_word(CODE_SEGMENT, u32::from(offset))
    }
}
