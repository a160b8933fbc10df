//! EFLAGS and the machine status word.

use bitflags::bitflags;

use crate::regs::Width;

bitflags! {
    /// The EFLAGS subset visible to real-mode code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const CF = 1 << 0;
        /// Always reads as 1.
        const RESERVED1 = 1 << 1;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
        const IOPL = 0b11 << 12;
        const NT = 1 << 14;
        const RF = 1 << 16;
        const VM = 1 << 17;
        const AC = 1 << 18;
        const VIF = 1 << 19;
        const VIP = 1 << 20;
        const ID = 1 << 21;
    }
}

/// Bits a 16-bit `POPF`/`IRET` may change.
const WRITABLE_LOW: u32 = 0x0000_7FD5;
/// Bits a 32-bit `POPFD` may change; VM and RF are never loaded from the stack in real mode.
const WRITABLE_HIGH: u32 = WRITABLE_LOW | Flags::AC.bits() | Flags::ID.bits();
/// Bits `SAHF` loads from AH.
const ARITHMETIC_LOW: u32 = 0xD5;

macro_rules! flag_accessors {
    ($ty:ident { $($get:ident, $set:ident => $flag:ident;)* }) => {
        impl $ty {
            $(
                #[inline]
                pub fn $get(&self) -> bool {
                    self.contains($ty::$flag)
                }

                #[inline]
                pub fn $set(&mut self, value: bool) {
                    self.set($ty::$flag, value)
                }
            )*
        }
    };
}

flag_accessors!(Flags {
    carry, set_carry => CF;
    parity, set_parity => PF;
    auxiliary, set_auxiliary => AF;
    zero, set_zero => ZF;
    sign, set_sign => SF;
    trap, set_trap => TF;
    interrupts, set_interrupts => IF;
    direction, set_direction => DF;
    overflow, set_overflow => OF;
    nested_task, set_nested_task => NT;
    resume, set_resume => RF;
    virtual_mode, set_virtual_mode => VM;
    alignment_check, set_alignment_check => AC;
    virtual_interrupt, set_virtual_interrupt => VIF;
    virtual_interrupt_pending, set_virtual_interrupt_pending => VIP;
    identification, set_identification => ID;
});

impl Flags {
    /// EFLAGS after reset.
    pub const RESET: Flags = Flags::from_bits_retain(0x0202);

    pub fn iopl(&self) -> u8 {
        ((self.bits() >> 12) & 0b11) as u8
    }

    pub fn set_iopl(&mut self, level: u8) {
        let bits = (self.bits() & !Flags::IOPL.bits()) | (u32::from(level & 0b11) << 12);
        *self = Flags::from_bits_retain(bits);
    }

    /// The value `PUSHF`/`PUSHFD` or an interrupt stores on the stack.
    pub fn image(&self, width: Width) -> u32 {
        let bits = self.bits() | Flags::RESERVED1.bits();
        match width {
            Width::Dword => bits & !(Flags::VM.bits() | Flags::RF.bits()),
            _ => bits & 0xFFFF,
        }
    }

    /// Loads a stacked image as `POPF`/`IRET` would.
    pub fn load(&mut self, value: u32, width: Width) {
        let writable = match width {
            Width::Dword => WRITABLE_HIGH,
            _ => WRITABLE_LOW,
        };
        let bits = (self.bits() & !writable) | (value & writable) | Flags::RESERVED1.bits();
        *self = Flags::from_bits_retain(bits);
    }

    /// The low byte as `LAHF` reads it.
    pub fn low_byte(&self) -> u8 {
        (self.bits() & ARITHMETIC_LOW | Flags::RESERVED1.bits()) as u8
    }

    /// Loads SF, ZF, AF, PF and CF from `AH` as `SAHF` does.
    pub fn load_low_byte(&mut self, value: u8) {
        let bits = (self.bits() & !ARITHMETIC_LOW) | (u32::from(value) & ARITHMETIC_LOW);
        *self = Flags::from_bits_retain(bits | Flags::RESERVED1.bits());
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::RESET
    }
}

bitflags! {
    /// Machine status word (the CR0 bits real-mode code can observe).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MachineStatus: u32 {
        const PE = 1 << 0;
        const MP = 1 << 1;
        const EM = 1 << 2;
        const TS = 1 << 3;
        const ET = 1 << 4;
        const PG = 1 << 31;
    }
}

flag_accessors!(MachineStatus {
    protection_enabled, set_protection_enabled => PE;
    fpu_present, set_fpu_present => MP;
    fpu_emulated, set_fpu_emulated => EM;
    task_switched, set_task_switched => TS;
    extension_type, set_extension_type => ET;
    paging, set_paging => PG;
});

impl MachineStatus {
    pub const RESET: MachineStatus = MachineStatus::from_bits_retain(0x8000_001A);

    /// Applies `LMSW`: only the low four bits load, and PE cannot be cleared.
    pub fn load_word(&mut self, value: u16) {
        let keep_pe = self.bits() & MachineStatus::PE.bits();
        let bits = (self.bits() & !0xF) | (u32::from(value) & 0xF) | keep_pe;
        *self = MachineStatus::from_bits_retain(bits);
    }
}

impl Default for MachineStatus {
    fn default() -> Self {
        MachineStatus::RESET
    }
}
