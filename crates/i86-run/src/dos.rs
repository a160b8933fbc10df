//! The handful of DOS services a `.COM` test program needs.

use std::io::{self, Write};
use std::sync::{Arc, OnceLock};

use i86_core::{AssemblyError, Cpu, InterruptTable, PortIo, Reg16, Reg8, SegReg, Width};
use tracing::debug;

/// Longest `$`-terminated string `AH=09h` will print.
const MAX_STRING: u32 = 0x1_0000;

/// Exit code recorded by `INT 21h, AH=4Ch`.
#[derive(Debug, Clone, Default)]
pub struct ExitStatus(Arc<OnceLock<u8>>);

impl ExitStatus {
    pub fn code(&self) -> Option<u8> {
        self.0.get().copied()
    }

    fn record(&self, code: u8) {
        // A second exit cannot happen: the first one halts the CPU.
        let _ = self.0.set(code);
    }
}

fn emit(bytes: &[u8]) -> i86_core::Result<()> {
    let mut out = io::stdout().lock();
    out.write_all(bytes)
        .and_then(|()| out.flush())
        .map_err(|err| AssemblyError::Handler(format!("console write failed: {err}")))
}

/// Installs `INT 20h` (terminate) and `INT 21h` functions 02h, 09h and 4Ch.
pub fn install(table: &mut InterruptTable) -> ExitStatus {
    let status = ExitStatus::default();

    table.register_fn(0x20, |cpu: &mut Cpu| {
        debug!("INT 20h terminate");
        cpu.halt();
        Ok(())
    });

    let exit = status.clone();
    table.register_fn(0x21, move |cpu: &mut Cpu| {
        let function = cpu.regs.get8(Reg8::Ah);
        match function {
            0x02 => emit(&[cpu.regs.get8(Reg8::Dl)]),
            0x09 => {
                let ds = cpu.regs.seg(SegReg::Ds);
                let start = u32::from(cpu.regs.get16(Reg16::Dx));
                let text: Vec<u8> = (0..MAX_STRING)
                    .map(|i| cpu.read_at(SegReg::Ds, (start + i) & 0xFFFF, Width::Byte) as u8)
                    .take_while(|&byte| byte != b'$')
                    .collect();
                debug!(ds, dx = start, len = text.len(), "print string");
                emit(&text)
            }
            0x4C => {
                let code = cpu.regs.get8(Reg8::Al);
                debug!(code, "INT 21h exit");
                exit.record(code);
                cpu.halt();
                Ok(())
            }
            _ => Err(AssemblyError::InvalidFunction {
                vector: 0x21,
                function: u16::from(function),
            }),
        }
    });

    status
}

/// Bochs-style debug console: bytes written to port `0xE9` go to stdout.
#[derive(Debug, Default)]
pub struct DebugConsole;

pub const DEBUG_CONSOLE_PORT: u16 = 0xE9;

impl PortIo for DebugConsole {
    fn read(&mut self, port: u16, width: Width) -> u32 {
        if port == DEBUG_CONSOLE_PORT {
            DEBUG_CONSOLE_PORT.into()
        } else {
            width.mask()
        }
    }

    fn write(&mut self, port: u16, _width: Width, value: u32) {
        if port != DEBUG_CONSOLE_PORT {
            return;
        }
        if let Err(err) = emit(&[value as u8]) {
            tracing::warn!(%err, "debug console");
        }
    }
}
