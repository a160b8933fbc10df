//! Register file.
//!
//! Each general purpose register is a single 32-bit cell; the 16-bit and 8-bit
//! views (`AX`, `AL`, `AH`, ...) are masks over that cell, so a write through any
//! view is immediately visible through every other one.

use std::fmt;

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Word => 16,
            Width::Dword => 32,
        }
    }

    #[inline]
    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    #[inline]
    pub const fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
        }
    }

    #[inline]
    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    #[inline]
    pub const fn truncate(self, value: u32) -> u32 {
        value & self.mask()
    }

    /// Sign-extends the low `self` bits of `value` to 32 bits.
    #[inline]
    pub const fn sign_extend(self, value: u32) -> u32 {
        match self {
            Width::Byte => value as u8 as i8 as i32 as u32,
            Width::Word => value as u16 as i16 as i32 as u32,
            Width::Dword => value,
        }
    }

    /// The next wider width (used by widening multiplies and divides).
    pub const fn doubled(self) -> Width {
        match self {
            Width::Byte => Width::Word,
            Width::Word | Width::Dword => Width::Dword,
        }
    }
}

macro_rules! register_codes {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $text:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $code),*
        }

        impl $name {
            pub fn try_from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Maps an encoded register number to the register.
            ///
            /// # Panics
            ///
            /// Panics on codes outside the encodable range.
            pub fn from_code(code: u8) -> Self {
                match Self::try_from_code(code) {
                    Some(reg) => reg,
                    None => panic!(concat!("invalid ", stringify!($name), " code {}"), code),
                }
            }

            #[inline]
            pub const fn code(self) -> u8 {
                self as u8
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

register_codes! {
    /// 8-bit general purpose registers in encoding order.
    Reg8 { Al = 0 => "AL", Cl = 1 => "CL", Dl = 2 => "DL", Bl = 3 => "BL", Ah = 4 => "AH", Ch = 5 => "CH", Dh = 6 => "DH", Bh = 7 => "BH" }
}

register_codes! {
    /// 16-bit general purpose registers in encoding order.
    Reg16 { Ax = 0 => "AX", Cx = 1 => "CX", Dx = 2 => "DX", Bx = 3 => "BX", Sp = 4 => "SP", Bp = 5 => "BP", Si = 6 => "SI", Di = 7 => "DI" }
}

register_codes! {
    /// 32-bit general purpose registers in encoding order.
    Reg32 { Eax = 0 => "EAX", Ecx = 1 => "ECX", Edx = 2 => "EDX", Ebx = 3 => "EBX", Esp = 4 => "ESP", Ebp = 5 => "EBP", Esi = 6 => "ESI", Edi = 7 => "EDI" }
}

register_codes! {
    /// Segment registers in encoding order.
    SegReg { Es = 0 => "ES", Cs = 1 => "CS", Ss = 2 => "SS", Ds = 3 => "DS", Fs = 4 => "FS", Gs = 5 => "GS" }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    General,
    Segment,
}

/// A named register, as referenced by an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Byte(Reg8),
    Word(Reg16),
    Dword(Reg32),
    Segment(SegReg),
    Ip,
    Eip,
}

impl Register {
    /// Looks up a register by class, width and 3-bit code.
    ///
    /// Segment registers are always 16 bits wide; `width` is ignored for them.
    ///
    /// # Panics
    ///
    /// Panics on codes outside the encodable range for the class.
    pub fn lookup(class: RegisterClass, width: Width, code: u8) -> Register {
        match class {
            RegisterClass::General => Register::gpr(width, code),
            RegisterClass::Segment => Register::Segment(SegReg::from_code(code)),
        }
    }

    pub fn gpr(width: Width, code: u8) -> Register {
        match width {
            Width::Byte => Register::Byte(Reg8::from_code(code)),
            Width::Word => Register::Word(Reg16::from_code(code)),
            Width::Dword => Register::Dword(Reg32::from_code(code)),
        }
    }

    pub const fn width(self) -> Width {
        match self {
            Register::Byte(_) => Width::Byte,
            Register::Word(_) | Register::Segment(_) | Register::Ip => Width::Word,
            Register::Dword(_) | Register::Eip => Width::Dword,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::Byte(r) => r.name(),
            Register::Word(r) => r.name(),
            Register::Dword(r) => r.name(),
            Register::Segment(r) => r.name(),
            Register::Ip => "IP",
            Register::Eip => "EIP",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Register storage for one CPU.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    gpr: [u32; 8],
    seg: [u16; 6],
    eip: u32,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get8(&self, reg: Reg8) -> u8 {
        let code = reg.code();
        let cell = self.gpr[usize::from(code & 3)];
        if code & 4 != 0 {
            (cell >> 8) as u8
        } else {
            cell as u8
        }
    }

    #[inline]
    pub fn set8(&mut self, reg: Reg8, value: u8) {
        let code = reg.code();
        let cell = &mut self.gpr[usize::from(code & 3)];
        if code & 4 != 0 {
            *cell = (*cell & !0xFF00) | (u32::from(value) << 8);
        } else {
            *cell = (*cell & !0xFF) | u32::from(value);
        }
    }

    #[inline]
    pub fn get16(&self, reg: Reg16) -> u16 {
        self.gpr[usize::from(reg.code())] as u16
    }

    #[inline]
    pub fn set16(&mut self, reg: Reg16, value: u16) {
        let cell = &mut self.gpr[usize::from(reg.code())];
        *cell = (*cell & 0xFFFF_0000) | u32::from(value);
    }

    #[inline]
    pub fn get32(&self, reg: Reg32) -> u32 {
        self.gpr[usize::from(reg.code())]
    }

    #[inline]
    pub fn set32(&mut self, reg: Reg32, value: u32) {
        self.gpr[usize::from(reg.code())] = value;
    }

    #[inline]
    pub fn seg(&self, reg: SegReg) -> u16 {
        self.seg[usize::from(reg.code())]
    }

    #[inline]
    pub fn set_seg(&mut self, reg: SegReg, value: u16) {
        self.seg[usize::from(reg.code())] = value;
    }

    #[inline]
    pub fn ip(&self) -> u16 {
        self.eip as u16
    }

    /// Sets IP; the upper half of EIP is cleared as on a 16-bit jump.
    #[inline]
    pub fn set_ip(&mut self, ip: u16) {
        self.eip = u32::from(ip);
    }

    #[inline]
    pub fn eip(&self) -> u32 {
        self.eip
    }

    #[inline]
    pub fn set_eip(&mut self, eip: u32) {
        self.eip = eip;
    }

    #[inline]
    pub fn sp(&self) -> u16 {
        self.get16(Reg16::Sp)
    }

    #[inline]
    pub fn set_sp(&mut self, sp: u16) {
        self.set16(Reg16::Sp, sp);
    }

    pub fn read(&self, reg: Register) -> u32 {
        match reg {
            Register::Byte(r) => u32::from(self.get8(r)),
            Register::Word(r) => u32::from(self.get16(r)),
            Register::Dword(r) => self.get32(r),
            Register::Segment(r) => u32::from(self.seg(r)),
            Register::Ip => u32::from(self.ip()),
            Register::Eip => self.eip,
        }
    }

    /// Writes `value` truncated to the register's width.
    pub fn write(&mut self, reg: Register, value: u32) {
        match reg {
            Register::Byte(r) => self.set8(r, value as u8),
            Register::Word(r) => self.set16(r, value as u16),
            Register::Dword(r) => self.set32(r, value),
            Register::Segment(r) => self.set_seg(r, value as u16),
            Register::Ip => self.set_ip(value as u16),
            Register::Eip => self.eip = value,
        }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in 0..8 {
            let reg = Reg32::from_code(code);
            if code > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:08X}", reg, self.get32(reg))?;
        }
        f.write_str("\n")?;
        for code in 0..6 {
            let reg = SegReg::from_code(code);
            write!(f, "{}={:04X} ", reg, self.seg(reg))?;
        }
        write!(f, "EIP={:08X}", self.eip)
    }
}
