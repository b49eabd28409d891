//! x86 register file and EFLAGS groups.

use std::fmt;

use crate::ir::{DataType, Identifier};

struct RegisterInfo {
    name: &'static str,
    /// Index of the full-width register this one is part of.
    family: u32,
    bit_offset: u32,
    bit_size: u32,
}

/// An x86 register, as an index into the static register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u8);

macro_rules! registers {
    ($($konst:ident = ($name:literal, $family:expr, $offset:expr, $bits:expr)),* $(,)?) => {
        const TABLE: &[RegisterInfo] = &[
            $(RegisterInfo { name: $name, family: $family, bit_offset: $offset, bit_size: $bits }),*
        ];

        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[repr(u8)]
        enum Slot { $($konst),* }

        impl Register {
            $(pub const $konst: Register = Register(Slot::$konst as u8);)*
        }
    };
}

registers! {
    AL = ("al", 0, 0, 8), CL = ("cl", 1, 0, 8), DL = ("dl", 2, 0, 8), BL = ("bl", 3, 0, 8),
    AH = ("ah", 0, 8, 8), CH = ("ch", 1, 8, 8), DH = ("dh", 2, 8, 8), BH = ("bh", 3, 8, 8),
    SPL = ("spl", 4, 0, 8), BPL = ("bpl", 5, 0, 8), SIL = ("sil", 6, 0, 8), DIL = ("dil", 7, 0, 8),
    R8B = ("r8b", 8, 0, 8), R9B = ("r9b", 9, 0, 8), R10B = ("r10b", 10, 0, 8), R11B = ("r11b", 11, 0, 8),
    R12B = ("r12b", 12, 0, 8), R13B = ("r13b", 13, 0, 8), R14B = ("r14b", 14, 0, 8), R15B = ("r15b", 15, 0, 8),

    AX = ("ax", 0, 0, 16), CX = ("cx", 1, 0, 16), DX = ("dx", 2, 0, 16), BX = ("bx", 3, 0, 16),
    SP = ("sp", 4, 0, 16), BP = ("bp", 5, 0, 16), SI = ("si", 6, 0, 16), DI = ("di", 7, 0, 16),
    R8W = ("r8w", 8, 0, 16), R9W = ("r9w", 9, 0, 16), R10W = ("r10w", 10, 0, 16), R11W = ("r11w", 11, 0, 16),
    R12W = ("r12w", 12, 0, 16), R13W = ("r13w", 13, 0, 16), R14W = ("r14w", 14, 0, 16), R15W = ("r15w", 15, 0, 16),

    EAX = ("eax", 0, 0, 32), ECX = ("ecx", 1, 0, 32), EDX = ("edx", 2, 0, 32), EBX = ("ebx", 3, 0, 32),
    ESP = ("esp", 4, 0, 32), EBP = ("ebp", 5, 0, 32), ESI = ("esi", 6, 0, 32), EDI = ("edi", 7, 0, 32),
    R8D = ("r8d", 8, 0, 32), R9D = ("r9d", 9, 0, 32), R10D = ("r10d", 10, 0, 32), R11D = ("r11d", 11, 0, 32),
    R12D = ("r12d", 12, 0, 32), R13D = ("r13d", 13, 0, 32), R14D = ("r14d", 14, 0, 32), R15D = ("r15d", 15, 0, 32),

    RAX = ("rax", 0, 0, 64), RCX = ("rcx", 1, 0, 64), RDX = ("rdx", 2, 0, 64), RBX = ("rbx", 3, 0, 64),
    RSP = ("rsp", 4, 0, 64), RBP = ("rbp", 5, 0, 64), RSI = ("rsi", 6, 0, 64), RDI = ("rdi", 7, 0, 64),
    R8 = ("r8", 8, 0, 64), R9 = ("r9", 9, 0, 64), R10 = ("r10", 10, 0, 64), R11 = ("r11", 11, 0, 64),
    R12 = ("r12", 12, 0, 64), R13 = ("r13", 13, 0, 64), R14 = ("r14", 14, 0, 64), R15 = ("r15", 15, 0, 64),

    ES = ("es", 16, 0, 16), CS = ("cs", 17, 0, 16), SS = ("ss", 18, 0, 16),
    DS = ("ds", 19, 0, 16), FS = ("fs", 20, 0, 16), GS = ("gs", 21, 0, 16),

    IP = ("ip", 22, 0, 16), EIP = ("eip", 22, 0, 32), RIP = ("rip", 22, 0, 64),

    ST0 = ("st0", 24, 0, 80), ST1 = ("st1", 25, 0, 80), ST2 = ("st2", 26, 0, 80), ST3 = ("st3", 27, 0, 80),
    ST4 = ("st4", 28, 0, 80), ST5 = ("st5", 29, 0, 80), ST6 = ("st6", 30, 0, 80), ST7 = ("st7", 31, 0, 80),
    TOP = ("Top", 32, 0, 8),
    FPUSW = ("fpusw", 33, 0, 16), FPUCW = ("fpucw", 34, 0, 16),
}

impl Register {
    fn info(self) -> &'static RegisterInfo {
        &TABLE[self.0 as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn bit_size(self) -> u32 {
        self.info().bit_size
    }

    pub fn data_type(self) -> DataType {
        match self.bit_size() {
            80 => DataType::Real80,
            bits => DataType::word(bits),
        }
    }

    /// Case-insensitive lookup, accepting Capstone's `st(0)` spelling.
    pub fn by_name(name: &str) -> Option<Register> {
        let name = name.to_ascii_lowercase();
        let name = match name.strip_prefix("st(").and_then(|s| s.strip_suffix(')')) {
            Some(n) => format!("st{}", n),
            None => name,
        };
        TABLE
            .iter()
            .position(|r| r.name == name)
            .map(|i| Register(i as u8))
    }

    /// The register of width `bits` in the same general-purpose family.
    pub fn with_width(self, bits: u32) -> Option<Register> {
        let family = self.info().family;
        TABLE
            .iter()
            .position(|r| r.family == family && r.bit_size == bits && r.bit_offset == 0)
            .map(|i| Register(i as u8))
    }

    pub fn identifier(self) -> Identifier {
        let info = self.info();
        Identifier::sub_register(info.name, self.data_type(), info.family, info.bit_offset)
    }

    /// `st(n)` for `n` in 0..8.
    pub fn fpu(n: u8) -> Register {
        Register(Register::ST0.0 + (n & 7))
    }

    /// `n` for `st(n)`.
    pub fn fpu_index(self) -> Option<u8> {
        match self.info().family {
            family @ 24..=31 => Some((family - 24) as u8),
            _ => None,
        }
    }

    pub fn is_segment(self) -> bool {
        (16..=21).contains(&self.info().family)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// EFLAGS bits.
pub mod flags {
    pub const CF: u32 = 0x0001;
    pub const PF: u32 = 0x0004;
    pub const AF: u32 = 0x0010;
    pub const ZF: u32 = 0x0040;
    pub const SF: u32 = 0x0080;
    pub const DF: u32 = 0x0400;
    pub const OF: u32 = 0x0800;

    pub const SZO: u32 = SF | ZF | OF;
    pub const SCZO: u32 = SF | CF | ZF | OF;
    pub const ALL: u32 = SF | CF | ZF | DF | OF | PF;
}

/// The flag group for the EFLAGS bits in `mask`, named by its letters.
pub fn flag_group(mask: u32) -> Identifier {
    const LETTERS: [(u32, char); 7] = [
        (flags::SF, 'S'),
        (flags::CF, 'C'),
        (flags::ZF, 'Z'),
        (flags::DF, 'D'),
        (flags::OF, 'O'),
        (flags::PF, 'P'),
        (flags::AF, 'A'),
    ];
    let name: String = LETTERS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, c)| *c)
        .collect();
    Identifier::flag_group(name, "eflags", mask)
}

/// Condition bits C0-C3 of the x87 status word.
pub const FPU_CONDITION: u32 = 0x4700;

/// The x87 condition codes written by comparisons and `fxam`.
pub fn fpu_flags() -> Identifier {
    Identifier::flag_group("FPUF", Register::FPUSW.name(), FPU_CONDITION)
}
