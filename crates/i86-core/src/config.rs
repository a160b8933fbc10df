use std::time::Duration;

/// How instructions are fetched for the execution loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode on the execution thread, one instruction at a time.
    Synchronous,
    /// Decode ahead on a worker thread into a queue of at most `depth` entries.
    Pipelined { depth: usize },
}

/// What a pop past the top of the stack does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnderflowPolicy {
    /// Log and continue with whatever the stack memory holds.
    #[default]
    Warn,
    /// End the run with `AssemblyError::StackUnderflow`.
    Fault,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerConfig {
    pub enabled: bool,
    /// Minimum time between two ticks (the PC's 18.2 Hz by default).
    pub interval: Duration,
    /// Interrupt vector raised on each tick.
    pub vector: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(1000 / 18),
            vector: 0x08,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub decode_mode: DecodeMode,

    /// Reuse decoded instructions at addresses whose bytes have not changed.
    pub decode_cache: bool,

    pub stack_underflow: UnderflowPolicy,

    /// SP at program start; arguments are pushed below it.
    pub initial_sp: u16,

    pub timer: TimerConfig,

    /// Stop after this many instructions. `None` runs until halted.
    pub instruction_limit: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::Synchronous,
            decode_cache: true,
            stack_underflow: UnderflowPolicy::Warn,
            initial_sp: 0xFFFE,
            timer: TimerConfig::default(),
            instruction_limit: None,
        }
    }
}

impl EngineConfig {
    pub fn pipelined(mut self, depth: usize) -> Self {
        self.decode_mode = DecodeMode::Pipelined { depth: depth.max(1) };
        self
    }
}
