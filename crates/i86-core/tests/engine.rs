mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, test_config, CODE_SEGMENT, ENTRY};
use i86_core::i86_memory::{Memory, RealModeMemory};
use i86_core::{
    Cpu, Engine, EngineConfig, ExitReason, FakeHostClock, FarPointer, Flags, PortIo, ProgramContext, Reg16,
    RunSummary, TimerConfig, Width,
};

const TICK: Duration = Duration::from_millis(10);

/// Writing to port 0x40 moves the host clock forward by one tick.
struct ClockPort {
    clock: FakeHostClock,
}

impl PortIo for ClockPort {
    fn read(&mut self, _port: u16, width: Width) -> u32 {
        width.mask()
    }

    fn write(&mut self, port: u16, _width: Width, _value: u32) {
        if port == 0x40 {
            self.clock.advance(TICK);
        }
    }
}

fn load(code: &[u8]) -> Arc<RealModeMemory> {
    init_tracing();
    let memory = Arc::new(RealModeMemory::new());
    memory
        .load(CODE_SEGMENT, u32::from(ENTRY), code)
        .expect("program fits in memory");
    memory
}

fn timed_engine(memory: Arc<RealModeMemory>) -> Engine {
    let clock = FakeHostClock::new();
    let config = EngineConfig {
        timer: TimerConfig {
            enabled: true,
            interval: TICK,
            vector: 0x08,
        },
        ..test_config()
    };
    Engine::new(memory, config)
        .with_clock(clock.clone())
        .with_ports(ClockPort { clock })
}

fn run(engine: &mut Engine) -> RunSummary {
    engine
        .execute(&ProgramContext::flat(CODE_SEGMENT, ENTRY))
        .expect("program runs to completion")
}

#[test]
fn timer_tick_vectors_through_guest_handler() {
    let memory = load(&[
        0xFB, // STI
        0xE6, 0x40, // OUT 40, AL
        0x90, // NOP
        0xF4, // HLT
    ]);
    // INC BYTE [0300]; IRET
    memory.set_bytes(CODE_SEGMENT, 0x0200, &[0xFE, 0x06, 0x00, 0x03, 0xCF]);
    let mut engine = timed_engine(memory.clone());
    engine.cpu().set_vector(0x08, FarPointer::new(CODE_SEGMENT, 0x0200));

    let summary = run(&mut engine);
    assert_eq!(memory.get_byte(CODE_SEGMENT, 0x0300), 1);
    assert_eq!(summary.instructions, 6);
    assert_eq!(engine.cpu().regs.sp(), 0xFFFE);
}

#[test]
fn timer_is_masked_by_cli() {
    let memory = load(&[0xFA, 0xE6, 0x40, 0x90, 0xF4]);
    memory.set_bytes(CODE_SEGMENT, 0x0200, &[0xFE, 0x06, 0x00, 0x03, 0xCF]);
    let mut engine = timed_engine(memory.clone());
    engine.cpu().set_vector(0x08, FarPointer::new(CODE_SEGMENT, 0x0200));

    let summary = run(&mut engine);
    assert_eq!(memory.get_byte(CODE_SEGMENT, 0x0300), 0);
    assert_eq!(summary.instructions, 4);
}

#[test]
fn timer_without_handler_is_skipped() {
    let memory = load(&[0xE6, 0x40, 0x90, 0xF4]);
    let mut engine = timed_engine(memory);
    let summary = run(&mut engine);
    assert_eq!(summary.exit, ExitReason::Halted);
    assert_eq!(summary.instructions, 3);
}

#[test]
fn timer_can_be_served_natively() {
    let memory = load(&[0xE6, 0x40, 0x90, 0xE6, 0x40, 0x90, 0xF4]);
    let ticks = Arc::new(AtomicU32::new(0));
    let mut engine = timed_engine(memory);
    let counter = Arc::clone(&ticks);
    engine.interrupts_mut().register_fn(0x08, move |_cpu: &mut Cpu| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    run(&mut engine);
    assert_eq!(ticks.load(Ordering::SeqCst), 2);
    assert_eq!(engine.cpu().regs.sp(), 0xFFFE);
}

const SUM_TO_100: &[u8] = &[
    0x31, 0xC0, // 0100 XOR AX, AX
    0xB9, 0x64, 0x00, // 0102 MOV CX, 100
    0x01, 0xC8, // 0105 ADD AX, CX
    0xE2, 0xFC, // 0107 LOOP 0105
    0xA3, 0x00, 0x03, // 0109 MOV [0300], AX
    0xF4, // 010C HLT
];

fn run_with(code: &[u8], config: EngineConfig) -> (Arc<RealModeMemory>, Engine, RunSummary) {
    let memory = load(code);
    let mut engine = Engine::new(memory.clone(), config);
    let summary = run(&mut engine);
    (memory, engine, summary)
}

#[test]
fn pipelined_matches_synchronous() {
    let (sync_memory, sync_engine, sync_summary) = run_with(SUM_TO_100, test_config());
    for depth in [1, 4, 64] {
        let (memory, engine, summary) = run_with(SUM_TO_100, test_config().pipelined(depth));
        assert_eq!(summary, sync_summary, "depth {depth}");
        assert_eq!(memory.get_word(CODE_SEGMENT, 0x0300), 5050);
        assert_eq!(engine.cpu().regs, sync_engine.cpu().regs, "depth {depth}");
    }
    assert_eq!(sync_memory.get_word(CODE_SEGMENT, 0x0300), 5050);
    assert_eq!(sync_summary.instructions, 204);
}

#[test]
fn pipelined_far_call_and_interrupts() {
    let code = [
        0x9A, 0x00, 0x00, 0x00, 0x20, // CALL 2000:0000
        0xCD, 0x60, // INT 60
        0xF4, // HLT
    ];
    for config in [test_config(), test_config().pipelined(8)] {
        let memory = load(&code);
        memory.set_bytes(0x2000, 0, &[0xB8, 0x11, 0x00, 0xCB]); // MOV AX, 11; RETF
        memory.set_bytes(CODE_SEGMENT, 0x0200, &[0x83, 0xC0, 0x22, 0xCF]); // ADD AX, 22; IRET
        let mut engine = Engine::new(memory, config);
        engine.cpu().set_vector(0x60, FarPointer::new(CODE_SEGMENT, 0x0200));
        let summary = run(&mut engine);
        assert_eq!(engine.cpu().regs.get16(Reg16::Ax), 0x33);
        assert_eq!(summary.instructions, 7);
    }
}

#[test]
fn self_modifying_code_sees_new_bytes() {
    let code = [
        0xB9, 0x02, 0x00, // 0100 MOV CX, 2
        0xB8, 0x01, 0x00, // 0103 MOV AX, 1
        0xC6, 0x06, 0x04, 0x01, 0x02, // 0106 MOV BYTE [0104], 2
        0xE2, 0xF6, // 010B LOOP 0103
        0xF4, // 010D HLT
    ];
    for cache in [true, false] {
        for config in [test_config(), test_config().pipelined(4)] {
            let config = EngineConfig {
                decode_cache: cache,
                ..config
            };
            let (_, engine, _) = run_with(&code, config);
            assert_eq!(engine.cpu().regs.get16(Reg16::Ax), 2, "cache {cache}");
        }
    }
}

#[test]
fn instruction_limit_stops_endless_loop() {
    for config in [test_config(), test_config().pipelined(2)] {
        let config = EngineConfig {
            instruction_limit: Some(50),
            ..config
        };
        let (_, engine, summary) = run_with(&[0xEB, 0xFE], config);
        assert_eq!(summary.exit, ExitReason::InstructionLimit);
        assert_eq!(summary.instructions, 50);
        assert_eq!(engine.cpu().regs.ip(), ENTRY);
    }
}

#[test]
fn engine_can_run_twice() {
    let memory = load(SUM_TO_100);
    let mut engine = Engine::new(memory.clone(), test_config().pipelined(2));
    let first = run(&mut engine);
    memory.set_word(CODE_SEGMENT, 0x0300, 0);
    let second = run(&mut engine);
    assert_eq!(first, second);
    assert_eq!(memory.get_word(CODE_SEGMENT, 0x0300), 5050);
}

#[test]
fn queued_decode_of_rewritten_code_is_discarded() {
    let code = [
        0xCD, 0x60, // 0100 INT 60
        0xC6, 0x06, 0x07, 0x01, 0x40, // 0102 MOV BYTE [0107], 40
        0x90, // 0107 NOP, becomes INC AX
        0xF4, // 0108 HLT
    ];
    let configs = [
        test_config(),
        test_config().pipelined(4),
        test_config().pipelined(8),
    ];
    for cache in [true, false] {
        for config in configs.clone() {
            let pipelined = config != test_config();
            let config = EngineConfig {
                decode_cache: cache,
                ..config
            };
            for _ in 0..3 {
                let memory = load(&code);
                let mut engine = Engine::new(memory, config.clone());
                // Give the decode worker time to queue the NOP before it is rewritten.
                engine.interrupts_mut().register_fn(0x60, |_cpu: &mut Cpu| {
                    std::thread::sleep(Duration::from_millis(20));
                    Ok(())
                });
                let summary = run(&mut engine);
                assert_eq!(
                    engine.cpu().regs.get16(Reg16::Ax),
                    1,
                    "cache {cache}, pipelined {pipelined}"
                );
                assert_eq!(summary.instructions, 4);
            }
        }
    }
}

#[test]
fn flags_are_reset_between_runs() {
    // STD; CLI; HLT
    let memory = load(&[0xFD, 0xFA, 0xF4]);
    let mut engine = Engine::new(memory.clone(), test_config());
    run(&mut engine);
    assert!(engine.cpu().flags.contains(Flags::DF));
    assert!(!engine.cpu().flags.interrupts());

    // PUSHF; POP AX; HLT
    memory.set_bytes(CODE_SEGMENT, ENTRY.into(), &[0x9C, 0x58, 0xF4]);
    run(&mut engine);
    assert_eq!(engine.cpu().regs.get16(Reg16::Ax), 0x0202);
    assert_eq!(engine.cpu().flags, Flags::RESET);
}
