mod common;

use common::{test_config, Machine, CODE_SEGMENT};
use i86_core::i86_memory::Memory;
use i86_core::{AssemblyError, Cpu, EngineConfig, ExitReason, Flags, Reg16, Reg32, Reg8, SegReg, UnderflowPolicy};

#[test]
fn arithmetic_and_multiply() {
    let mut m = Machine::new(&[
        0xB8, 0x05, 0x00, // MOV AX, 5
        0xBB, 0x03, 0x00, // MOV BX, 3
        0x01, 0xD8, // ADD AX, BX
        0xF7, 0xE3, // MUL BX
        0xF4, // HLT
    ]);
    let summary = m.run();
    assert_eq!(summary.exit, ExitReason::Halted);
    assert_eq!(summary.instructions, 5);
    assert_eq!(m.regs().get16(Reg16::Ax), 24);
    assert_eq!(m.regs().get16(Reg16::Dx), 0);
    assert_eq!(m.regs().ip(), 0x010B);
}

#[test]
fn call_and_ret_pair_up() {
    let mut m = Machine::new(&[
        0xE8, 0x04, 0x00, // 0100 CALL 0107
        0xB9, 0x02, 0x00, // 0103 MOV CX, 2
        0xF4, // 0106 HLT
        0xB8, 0x34, 0x12, // 0107 MOV AX, 1234
        0xC3, // 010A RET
    ]);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 0x1234);
    assert_eq!(m.regs().get16(Reg16::Cx), 2);
    assert_eq!(m.regs().sp(), 0xFFFE);
}

#[test]
fn ret_imm_releases_caller_arguments() {
    let mut m = Machine::new(&[
        0x6A, 0x07, // 0100 PUSH 7
        0x6A, 0x09, // 0102 PUSH 9
        0xE8, 0x04, 0x00, // 0104 CALL 010B
        0xF4, // 0107 HLT
        0x90, 0x90, 0x90, // 0108
        0x55, // 010B PUSH BP
        0x89, 0xE5, // 010C MOV BP, SP
        0x8B, 0x46, 0x04, // 010E MOV AX, [BP+4]
        0x03, 0x46, 0x06, // 0111 ADD AX, [BP+6]
        0x5D, // 0114 POP BP
        0xC2, 0x04, 0x00, // 0115 RET 4
    ]);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 16);
    assert_eq!(m.regs().sp(), 0xFFFE);
    assert_eq!(m.regs().ip(), 0x0108);
}

#[test]
fn far_call_and_retf() {
    let mut m = Machine::new(&[
        0x9A, 0x00, 0x00, 0x00, 0x20, // CALL 2000:0000
        0xF4, // HLT
    ]);
    m.memory.set_bytes(0x2000, 0, &[0xB8, 0x99, 0x00, 0xCB]);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 0x99);
    assert_eq!(m.regs().seg(SegReg::Cs), CODE_SEGMENT);
    assert_eq!(m.regs().sp(), 0xFFFE);
}

#[test]
fn return_with_empty_frame_halts() {
    let mut m = Machine::new(&[
        0xB8, 0x01, 0x00, // MOV AX, 1
        0xC3, // RET
        0xB8, 0x02, 0x00, // MOV AX, 2
    ]);
    let summary = m.run();
    assert_eq!(summary.exit, ExitReason::Halted);
    assert_eq!(summary.instructions, 2);
    assert_eq!(m.regs().get16(Reg16::Ax), 1);
}

#[test]
fn arguments_are_pushed_in_order() {
    let mut m = Machine::new(&[
        0x8B, 0xEC, // MOV BP, SP
        0x8B, 0x46, 0x00, // MOV AX, [BP]
        0x8B, 0x5E, 0x02, // MOV BX, [BP+2]
        0xC3, // RET
    ]);
    m.program = m.program.clone().with_argument(0x1111).with_argument(0x2222);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 0x2222);
    assert_eq!(m.regs().get16(Reg16::Bx), 0x1111);
    assert_eq!(m.regs().sp(), 0xFFFA);
}

#[test]
fn loop_counts_down_cx() {
    let mut m = Machine::new(&[
        0x31, 0xC0, // 0100 XOR AX, AX
        0xB9, 0x0A, 0x00, // 0102 MOV CX, 10
        0x40, // 0105 INC AX
        0xE2, 0xFD, // 0106 LOOP 0105
        0xF4, // 0108 HLT
    ]);
    let summary = m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 10);
    assert_eq!(m.regs().get16(Reg16::Cx), 0);
    assert_eq!(summary.instructions, 2 + 20 + 1);
}

#[test]
fn rep_movsb_copies_forward() {
    let mut m = Machine::new(&[
        0xBE, 0x00, 0x03, // MOV SI, 0300
        0xBF, 0x00, 0x04, // MOV DI, 0400
        0xB9, 0x05, 0x00, // MOV CX, 5
        0xFC, // CLD
        0xF3, 0xA4, // REP MOVSB
        0xF4, // HLT
    ]);
    m.poke(0x0300, b"hello");
    m.run();
    let copied: Vec<u8> = (0..5).map(|i| m.byte(0x0400 + i)).collect();
    assert_eq!(copied, b"hello");
    assert_eq!(m.regs().get16(Reg16::Cx), 0);
    assert_eq!(m.regs().get16(Reg16::Si), 0x0305);
    assert_eq!(m.regs().get16(Reg16::Di), 0x0405);
}

#[test]
fn repne_scasb_stops_on_match() {
    let mut m = Machine::new(&[
        0xBF, 0x00, 0x03, // MOV DI, 0300
        0xB9, 0x10, 0x00, // MOV CX, 16
        0xB0, b'l', // MOV AL, 'l'
        0xFC, // CLD
        0xF2, 0xAE, // REPNE SCASB
        0xF4, // HLT
    ]);
    m.poke(0x0300, b"hello");
    m.run();
    assert_eq!(m.regs().get16(Reg16::Di), 0x0303);
    assert_eq!(m.regs().get16(Reg16::Cx), 13);
    assert!(m.engine.cpu().flags.zero());
}

#[test]
fn std_runs_strings_backwards() {
    let mut m = Machine::new(&[
        0xBF, 0x04, 0x04, // MOV DI, 0404
        0xB9, 0x05, 0x00, // MOV CX, 5
        0xB0, 0x2A, // MOV AL, '*'
        0xFD, // STD
        0xF3, 0xAA, // REP STOSB
        0xF4, // HLT
    ]);
    m.run();
    assert!((0x0400..0x0405).all(|offset| m.byte(offset) == 0x2A));
    assert_eq!(m.byte(0x03FF), 0);
    assert_eq!(m.regs().get16(Reg16::Di), 0x03FF);
}

#[test]
fn guest_interrupt_returns_through_iret() {
    let mut m = Machine::new(&[
        0xCD, 0x60, // INT 60
        0xF4, // HLT
    ]);
    m.poke(0x0200, &[0xB8, 0xAA, 0x55, 0xCF]); // MOV AX, 55AA; IRET
    m.set_vector(0x60, 0x0200);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 0x55AA);
    assert_eq!(m.regs().sp(), 0xFFFE);
    assert!(m.engine.cpu().flags.interrupts());
    assert_eq!(m.regs().ip(), 0x0103);
}

#[test]
fn native_handler_reports_through_stacked_flags() {
    let mut m = Machine::new(&[
        0xB4, 0x30, // 0100 MOV AH, 30
        0xCD, 0x21, // 0102 INT 21
        0x72, 0x01, // 0104 JC 0107
        0xF4, // 0106 HLT
        0xBB, 0x01, 0x00, // 0107 MOV BX, 1
        0xF4, // 010A HLT
    ]);
    m.engine.interrupts_mut().register_fn(0x21, |cpu: &mut Cpu| {
        match cpu.regs.get8(Reg8::Ah) {
            0x30 => {
                cpu.regs.set16(Reg16::Ax, 0x0005);
                cpu.set_return_flag(Flags::CF, true);
                Ok(())
            }
            function => Err(AssemblyError::InvalidFunction {
                vector: 0x21,
                function: u16::from(function),
            }),
        }
    });
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 5);
    assert_eq!(m.regs().get16(Reg16::Bx), 1);
    assert!(m.engine.cpu().flags.carry());
    assert_eq!(m.regs().sp(), 0xFFFE);
}

#[test]
fn handler_errors_end_the_run() {
    let mut m = Machine::new(&[0xB4, 0x4F, 0xCD, 0x21, 0xF4]);
    m.engine.interrupts_mut().register_fn(0x21, |cpu: &mut Cpu| {
        Err(AssemblyError::InvalidFunction {
            vector: 0x21,
            function: u16::from(cpu.regs.get8(Reg8::Ah)),
        })
    });
    assert_eq!(
        m.try_run(),
        Err(AssemblyError::InvalidFunction { vector: 0x21, function: 0x4F })
    );
}

#[test]
fn halting_handler_stops_execution() {
    let mut m = Machine::new(&[
        0xCD, 0x20, // INT 20
        0xB8, 0x01, 0x00, // MOV AX, 1
        0xF4,
    ]);
    m.engine.interrupts_mut().register_fn(0x20, |cpu: &mut Cpu| {
        cpu.halt();
        Ok(())
    });
    let summary = m.run();
    assert_eq!(summary.instructions, 1);
    assert_eq!(m.regs().get16(Reg16::Ax), 0);
}

#[test]
fn unhandled_interrupt_is_an_error() {
    let mut m = Machine::new(&[0xCD, 0x61, 0xF4]);
    assert_eq!(m.try_run(), Err(AssemblyError::UnhandledInterrupt { vector: 0x61 }));
}

#[test]
fn divide_error_vectors_to_guest_and_retries() {
    let mut m = Machine::new(&[
        0x31, 0xDB, // 0100 XOR BX, BX
        0xB8, 0x0A, 0x00, // 0102 MOV AX, 10
        0xF7, 0xF3, // 0105 DIV BX
        0xF4, // 0107 HLT
    ]);
    m.poke(0x0200, &[0xBB, 0x01, 0x00, 0xCF]); // MOV BX, 1; IRET
    m.set_vector(0x00, 0x0200);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 10);
    assert_eq!(m.regs().get16(Reg16::Dx), 0);
    assert_eq!(m.regs().get16(Reg16::Bx), 1);
}

#[test]
fn divide_error_without_handler_is_ignored() {
    let mut m = Machine::new(&[
        0x31, 0xDB, // XOR BX, BX
        0xB8, 0x0A, 0x00, // MOV AX, 10
        0xF7, 0xF3, // DIV BX
        0xF4, // HLT
    ]);
    let summary = m.run();
    assert_eq!(summary.exit, ExitReason::Halted);
    assert_eq!(m.regs().get16(Reg16::Ax), 10);
}

#[test]
fn bound_violation_raises_vector_5() {
    let mut m = Machine::new(&[
        0xB8, 0x20, 0x00, // MOV AX, 20
        0x62, 0x06, 0x00, 0x03, // BOUND AX, [0300]
        0xF4, // HLT
    ]);
    m.poke(0x0300, &[0x00, 0x00, 0x10, 0x00]); // bounds 0..=16
    m.poke(0x0200, &[0xB8, 0x05, 0x00, 0xCF]); // MOV AX, 5; IRET
    m.set_vector(0x05, 0x0200);
    let summary = m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 5);
    // MOV, BOUND (faulting), MOV, IRET, BOUND (retried), HLT
    assert_eq!(summary.instructions, 6);
}

#[test]
fn stack_underflow_policy() {
    let code = [0x58, 0xF4]; // POP AX; HLT

    let mut warn = Machine::new(&code);
    assert_eq!(warn.run().exit, ExitReason::Halted);

    let config = EngineConfig {
        stack_underflow: UnderflowPolicy::Fault,
        ..test_config()
    };
    let mut fault = Machine::with_config(&code, config);
    assert_eq!(
        fault.try_run(),
        Err(AssemblyError::StackUnderflow { ss: CODE_SEGMENT, sp: 0xFFFE })
    );
}

#[test]
fn machine_status_word_instructions() {
    let mut m = Machine::new(&[
        0x0F, 0x01, 0xE0, // SMSW AX
        0x0F, 0x06, // CLTS
        0x0F, 0x01, 0xE3, // SMSW BX
        0xB9, 0x0E, 0x00, // MOV CX, 000E
        0x0F, 0x01, 0xF1, // LMSW CX
        0x0F, 0x01, 0xE2, // SMSW DX
        0xF4,
    ]);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 0x001A);
    assert_eq!(m.regs().get16(Reg16::Bx), 0x0012);
    assert_eq!(m.regs().get16(Reg16::Dx), 0x001E);
}

#[test]
fn undefined_opcode_ends_the_run() {
    let mut m = Machine::new(&[0x90, 0xF1]);
    assert!(matches!(
        m.try_run(),
        Err(AssemblyError::UnhandledByteCode { code: 0xF1, address }) if address.offset == 0x0101
    ));
}

#[test]
fn enter_leave_and_pusha_popa() {
    let mut m = Machine::new(&[
        0xBD, 0x34, 0x12, // MOV BP, 1234
        0xC8, 0x08, 0x00, 0x00, // ENTER 8, 0
        0x89, 0xEA, // MOV DX, BP
        0xC9, // LEAVE
        0xBE, 0x77, 0x00, // MOV SI, 0077
        0x60, // PUSHA
        0x31, 0xF6, // XOR SI, SI
        0x61, // POPA
        0xF4,
    ]);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Dx), 0xFFFC);
    assert_eq!(m.regs().get16(Reg16::Bp), 0x1234);
    assert_eq!(m.regs().get16(Reg16::Si), 0x0077);
    assert_eq!(m.regs().sp(), 0xFFFE);
}

#[test]
fn segment_override_reads_other_segment() {
    let mut m = Machine::new(&[
        0xB8, 0x00, 0x30, // MOV AX, 3000
        0x8E, 0xC0, // MOV ES, AX
        0x26, 0xA1, 0x10, 0x00, // MOV AX, ES:[0010]
        0x8B, 0x1E, 0x10, 0x00, // MOV BX, [0010]
        0xF4,
    ]);
    m.memory.set_word(0x3000, 0x0010, 0xBEEF);
    m.memory.set_word(CODE_SEGMENT, 0x0010, 0xCAFE);
    m.run();
    assert_eq!(m.regs().get16(Reg16::Ax), 0xBEEF);
    assert_eq!(m.regs().get16(Reg16::Bx), 0xCAFE);
}

#[test]
fn operand_size_prefix_uses_32_bit_registers() {
    let mut m = Machine::new(&[
        0x66, 0xB8, 0xFF, 0xFF, 0x00, 0x00, // MOV EAX, 0000FFFF
        0x66, 0x40, // INC EAX
        0x66, 0x0F, 0xAF, 0xC0, // IMUL EAX, EAX
        0xF4,
    ]);
    m.run();
    assert_eq!(m.engine.cpu().regs.get32(Reg32::Eax), 0);
    assert_eq!(m.regs().get16(Reg16::Ax), 0);
    assert!(m.engine.cpu().flags.overflow());
}

#[test]
fn conditional_jumps_follow_flags() {
    let mut m = Machine::new(&[
        0xB8, 0xFF, 0x7F, // 0100 MOV AX, 7FFF
        0x40, // 0103 INC AX (overflow)
        0x70, 0x03, // 0104 JO 0109
        0xB3, 0x01, // 0106 MOV BL, 1
        0xF4, // 0108 HLT
        0xB3, 0x02, // 0109 MOV BL, 2
        0x0F, 0x8D, 0x01, 0x00, // 010B JGE 0110 (rel16)
        0xF4, // 010F HLT
        0xB7, 0x03, // 0110 MOV BH, 3
        0xF4,
    ]);
    m.run();
    assert_eq!(m.regs().get8(Reg8::Bl), 2);
    assert_eq!(m.regs().get8(Reg8::Bh), 3);
}
