#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use i86_core::{Engine, EngineConfig, ExitReason, ProgramContext, TimerConfig, UnderflowPolicy};
use i86_memory::RealModeMemory;
use tracing_subscriber::EnvFilter;

mod dos;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Underflow {
    Warn,
    Fault,
}

impl From<Underflow> for UnderflowPolicy {
    fn from(value: Underflow) -> Self {
        match value {
            Underflow::Warn => UnderflowPolicy::Warn,
            Underflow::Fault => UnderflowPolicy::Fault,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "i86-run", about = "Run a flat real-mode binary (.COM layout) on the i86 engine.")]
struct Args {
    /// Raw program image, loaded at SEGMENT:ENTRY
    image: PathBuf,

    /// Segment for code, data and stack (hex with 0x prefix, or decimal)
    #[arg(long, value_name = "SEG", default_value = "0x1000", value_parser = parse_u16)]
    segment: u16,

    /// Load offset and first IP
    #[arg(long, value_name = "OFFSET", default_value = "0x0100", value_parser = parse_u16)]
    entry: u16,

    /// Word pushed onto the stack before the first instruction; repeat for more
    #[arg(long = "arg", value_name = "WORD", value_parser = parse_u16)]
    arguments: Vec<u16>,

    /// Decode ahead on a worker thread
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pipelined: bool,

    /// Pipeline queue depth
    #[arg(long, value_name = "N", default_value_t = 16)]
    depth: usize,

    /// Stop after this many instructions
    #[arg(long, value_name = "N")]
    max_insts: Option<u64>,

    /// What a pop past the initial stack pointer does
    #[arg(long, value_enum, default_value_t = Underflow::Warn)]
    underflow: Underflow,

    /// Disable the decoded-instruction cache
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_cache: bool,

    /// Disable the periodic timer interrupt
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_timer: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, value_name = "FILTER", default_value = "warn")]
    log_level: String,
}

fn parse_u16(text: &str) -> Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("{text:?} is not a 16-bit value: {err}"))
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig {
            decode_cache: !self.no_cache,
            stack_underflow: self.underflow.into(),
            timer: TimerConfig {
                enabled: !self.no_timer,
                ..TimerConfig::default()
            },
            instruction_limit: self.max_insts,
            ..EngineConfig::default()
        };
        if self.pipelined {
            config.pipelined(self.depth)
        } else {
            config
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    run(args)
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let image = std::fs::read(&args.image)
        .with_context(|| format!("read image {}", args.image.display()))?;
    if image.is_empty() {
        bail!("image {} is empty", args.image.display());
    }

    let memory = Arc::new(RealModeMemory::new());
    memory
        .load(args.segment, u32::from(args.entry), &image)
        .with_context(|| format!("load {} bytes at {:04X}:{:04X}", image.len(), args.segment, args.entry))?;

    let mut engine = Engine::new(memory, args.engine_config()).with_ports(dos::DebugConsole);
    let status = dos::install(engine.interrupts_mut());

    let mut program = ProgramContext::flat(args.segment, args.entry);
    for &argument in &args.arguments {
        program = program.with_argument(argument);
    }

    let outcome = engine.execute(&program);
    eprintln!("{}", engine.cpu().regs);
    let summary = outcome.with_context(|| format!("execution stopped at {}", engine.cpu().code_address()))?;

    match summary.exit {
        ExitReason::Halted => eprintln!("halted after {} instructions", summary.instructions),
        ExitReason::InstructionLimit => {
            eprintln!("instruction limit reached after {} instructions", summary.instructions)
        }
    }
    Ok(ExitCode::from(status.code().unwrap_or(0)))
}
