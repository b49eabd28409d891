//! x86 opcodes, their mnemonics, and the flags each one defines.

use std::fmt;

use super::registers::flags;
use crate::ir::ConditionCode;

macro_rules! opcodes {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Opcodes known to the x86 back-end.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant),*
        }

        impl Opcode {
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name),*
                }
            }

            fn lookup(mnemonic: &str) -> Option<Opcode> {
                match mnemonic {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Aaa => "aaa", Aam => "aam", Adc => "adc", Add => "add", And => "and", Arpl => "arpl",
    Bsr => "bsr", Bswap => "bswap", Bt => "bt",
    Call => "call", Cbw => "cbw", Cdq => "cdq", Cdqe => "cdqe", Clc => "clc", Cld => "cld",
    Cli => "cli", Cmc => "cmc",
    Cmova => "cmova", Cmovae => "cmovae", Cmovb => "cmovb", Cmovbe => "cmovbe",
    Cmove => "cmove", Cmovg => "cmovg", Cmovge => "cmovge", Cmovl => "cmovl",
    Cmovle => "cmovle", Cmovne => "cmovne", Cmovno => "cmovno", Cmovnp => "cmovnp",
    Cmovns => "cmovns", Cmovo => "cmovo", Cmovp => "cmovp", Cmovs => "cmovs",
    Cmp => "cmp", Cmps => "cmps", Cmpsb => "cmpsb", Cpuid => "cpuid", Cqo => "cqo",
    Cwd => "cwd", Cwde => "cwde",
    Daa => "daa", Das => "das", Dec => "dec", Div => "div", Enter => "enter",
    Fadd => "fadd", Faddp => "faddp", Fchs => "fchs", Fclex => "fclex", Fcom => "fcom",
    Fcomp => "fcomp", Fcompp => "fcompp", Fcos => "fcos", Fdiv => "fdiv", Fdivp => "fdivp",
    Fdivr => "fdivr", Fdivrp => "fdivrp", Fiadd => "fiadd", Ficom => "ficom",
    Ficomp => "ficomp", Fidiv => "fidiv", Fidivr => "fidivr", Fild => "fild", Fimul => "fimul",
    Fist => "fist", Fistp => "fistp", Fisub => "fisub", Fisubr => "fisubr",
    Fld => "fld", Fld1 => "fld1", Fldcw => "fldcw", Fldpi => "fldpi", Fldz => "fldz",
    Fmul => "fmul", Fmulp => "fmulp", Fpatan => "fpatan", Frndint => "frndint",
    Fsin => "fsin", Fsincos => "fsincos", Fsqrt => "fsqrt", Fst => "fst", Fstcw => "fstcw",
    Fstp => "fstp", Fstsw => "fstsw", Fsub => "fsub", Fsubp => "fsubp", Fsubr => "fsubr",
    Fsubrp => "fsubrp", Ftst => "ftst", Fxam => "fxam", Fxch => "fxch", Fyl2x => "fyl2x",
    Hlt => "hlt", Idiv => "idiv", Imul => "imul", In => "in", Inc => "inc", Ins => "ins",
    Int => "int", Iret => "iret",
    Ja => "ja", Jae => "jae", Jb => "jb", Jbe => "jbe", Jcxz => "jcxz", Je => "je",
    Jecxz => "jecxz", Jg => "jg", Jge => "jge", Jl => "jl", Jle => "jle", Jmp => "jmp",
    Jne => "jne", Jno => "jno", Jnp => "jnp", Jns => "jns", Jo => "jo", Jp => "jp",
    Jrcxz => "jrcxz", Js => "js",
    Lahf => "lahf", Lds => "lds", Lea => "lea", Leave => "leave", Les => "les", Lfs => "lfs",
    Lgs => "lgs", Lods => "lods", Lodsb => "lodsb", Lss => "lss",
    Loop => "loop", Loope => "loope", Loopne => "loopne",
    Mov => "mov", Movs => "movs", Movsb => "movsb", Movsx => "movsx", Movsxd => "movsxd",
    Movzx => "movzx", Mul => "mul",
    Neg => "neg", Nop => "nop", Not => "not", Or => "or", Out => "out", Outs => "outs",
    Pop => "pop", Popa => "popa", Popf => "popf", Push => "push", Pusha => "pusha",
    Pushf => "pushf",
    Rcl => "rcl", Rcr => "rcr", Rdtsc => "rdtsc", Rep => "rep", Repne => "repne", Ret => "ret",
    Rol => "rol", Ror => "ror",
    Sahf => "sahf", Sar => "sar", Sbb => "sbb", Scas => "scas", Scasb => "scasb",
    Seta => "seta", Setae => "setae", Setb => "setb", Setbe => "setbe", Sete => "sete",
    Setg => "setg", Setge => "setge", Setl => "setl", Setle => "setle", Setne => "setne",
    Setno => "setno", Setnp => "setnp", Setns => "setns", Seto => "seto", Setp => "setp",
    Sets => "sets",
    Shl => "shl", Shld => "shld", Shr => "shr", Shrd => "shrd",
    Stc => "stc", Std => "std", Sti => "sti", Stos => "stos", Stosb => "stosb",
    Sub => "sub", Test => "test", Wait => "wait", Xchg => "xchg", Xlat => "xlat", Xor => "xor",
    Illegal => "illegal", Unrecognized => "unrecognized",
}

impl Opcode {
    /// Map a Capstone mnemonic to an opcode. String instructions with an
    /// explicit width suffix map to the generic form; the width travels in
    /// the operands.
    pub fn from_mnemonic(mnemonic: &str) -> Opcode {
        let canonical = match mnemonic {
            "jz" => "je",
            "jnz" => "jne",
            "jc" | "jnae" => "jb",
            "jnc" | "jnb" => "jae",
            "jna" => "jbe",
            "jnbe" => "ja",
            "jnge" => "jl",
            "jnl" => "jge",
            "jng" => "jle",
            "jnle" => "jg",
            "jpe" => "jp",
            "jpo" => "jnp",
            "cmovz" => "cmove",
            "cmovnz" => "cmovne",
            "setz" => "sete",
            "setnz" => "setne",
            "sal" => "shl",
            "xlatb" => "xlat",
            "pushfd" | "pushfq" => "pushf",
            "popfd" | "popfq" => "popf",
            "fwait" => "wait",
            "fisttp" => "fistp",
            "fucom" => "fcom",
            "fucomp" => "fcomp",
            "fucompp" => "fcompp",
            "fnstsw" => "fstsw",
            "fnstcw" => "fstcw",
            "fnclex" => "fclex",
            "iretd" | "iretq" => "iret",
            "pushal" | "pushaw" => "pusha",
            "popal" | "popaw" => "popa",
            "insb" | "insw" | "insd" => "ins",
            "outsb" | "outsw" | "outsd" => "outs",
            "ud2" => "illegal",
            "movsw" | "movsd" | "movsq" => "movs",
            "stosw" | "stosd" | "stosq" => "stos",
            "lodsw" | "lodsd" | "lodsq" => "lods",
            "cmpsw" | "cmpsd" | "cmpsq" => "cmps",
            "scasw" | "scasd" | "scasq" => "scas",
            "repe" | "repz" => "rep",
            "repnz" => "repne",
            other => other,
        };
        Opcode::lookup(canonical).unwrap_or(Opcode::Unrecognized)
    }

    /// Condition tested by a conditional jump, move, or set.
    pub fn condition(self) -> Option<ConditionCode> {
        use Opcode::*;
        let cc = match self {
            Ja | Cmova | Seta => ConditionCode::Ugt,
            Jae | Cmovae | Setae => ConditionCode::Uge,
            Jb | Cmovb | Setb => ConditionCode::Ult,
            Jbe | Cmovbe | Setbe => ConditionCode::Ule,
            Je | Cmove | Sete => ConditionCode::Eq,
            Jne | Cmovne | Setne => ConditionCode::Ne,
            Jg | Cmovg | Setg => ConditionCode::Gt,
            Jge | Cmovge | Setge => ConditionCode::Ge,
            Jl | Cmovl | Setl => ConditionCode::Lt,
            Jle | Cmovle | Setle => ConditionCode::Le,
            Jo | Cmovo | Seto => ConditionCode::Ov,
            Jno | Cmovno | Setno => ConditionCode::No,
            Js | Cmovs | Sets => ConditionCode::Sg,
            Jns | Cmovns | Setns => ConditionCode::Ns,
            Jp | Cmovp | Setp => ConditionCode::Pe,
            Jnp | Cmovnp | Setnp => ConditionCode::Po,
            _ => return None,
        };
        Some(cc)
    }

    /// EFLAGS bits written by the opcode.
    pub fn defined_flags(self) -> u32 {
        use Opcode::*;
        match self {
            Add | Adc | Sub | Sbb | Cmp | Cmps | Cmpsb | Scas | Scasb | Neg | Shl | Shr | Sar
            | Imul => flags::SCZO,
            And | Or | Xor | Test | Inc | Dec => flags::SZO,
            Rol | Ror | Rcl | Rcr | Bt | Daa | Das | Aaa => flags::CF,
            Bsr | Arpl => flags::ZF,
            _ => 0,
        }
    }

    pub fn is_string_instruction(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Movs | Movsb | Stos | Stosb | Lods | Lodsb | Cmps | Cmpsb | Scas | Scasb | Ins | Outs
        )
    }

    /// Opcodes whose immediate operand is a code address.
    pub fn takes_code_address(self) -> bool {
        use Opcode::*;
        (self.condition().is_some() && !self.is_cmov_or_set())
            || matches!(self, Jmp | Call | Jcxz | Jecxz | Jrcxz | Loop | Loope | Loopne)
    }

    fn is_cmov_or_set(self) -> bool {
        self.name().starts_with("cmov") || self.name().starts_with("set")
    }
}

/// Flags that a test of `cc` reads.
pub fn used_flags(cc: ConditionCode) -> u32 {
    match cc {
        ConditionCode::Ugt | ConditionCode::Ule => flags::CF | flags::ZF,
        ConditionCode::Ult | ConditionCode::Uge => flags::CF,
        ConditionCode::Eq | ConditionCode::Ne => flags::ZF,
        ConditionCode::Gt | ConditionCode::Le => flags::SF | flags::ZF | flags::OF,
        ConditionCode::Lt | ConditionCode::Ge => flags::SF | flags::OF,
        ConditionCode::Ov | ConditionCode::No => flags::OF,
        ConditionCode::Sg | ConditionCode::Ns => flags::SF,
        ConditionCode::Pe | ConditionCode::Po => flags::PF,
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_aliases() {
        assert_eq!(Opcode::from_mnemonic("jz"), Opcode::Je);
        assert_eq!(Opcode::from_mnemonic("movsd"), Opcode::Movs);
        assert_eq!(Opcode::from_mnemonic("add"), Opcode::Add);
        assert_eq!(Opcode::from_mnemonic("vpaddd"), Opcode::Unrecognized);
    }

    #[test]
    fn test_fpu_and_legacy_mnemonics() {
        assert_eq!(Opcode::from_mnemonic("fld"), Opcode::Fld);
        assert_eq!(Opcode::from_mnemonic("fnstsw"), Opcode::Fstsw);
        assert_eq!(Opcode::from_mnemonic("fucompp"), Opcode::Fcompp);
        assert_eq!(Opcode::from_mnemonic("fisttp"), Opcode::Fistp);
        assert_eq!(Opcode::from_mnemonic("iretd"), Opcode::Iret);
        assert_eq!(Opcode::from_mnemonic("pushal"), Opcode::Pusha);
        assert_eq!(Opcode::from_mnemonic("outsb"), Opcode::Outs);
        assert!(Opcode::Ins.is_string_instruction());
        assert_eq!(Opcode::Arpl.defined_flags(), flags::ZF);
    }

    #[test]
    fn test_conditions() {
        assert_eq!(Opcode::Jbe.condition(), Some(ConditionCode::Ule));
        assert_eq!(Opcode::Setne.condition(), Some(ConditionCode::Ne));
        assert_eq!(Opcode::Mov.condition(), None);
        assert_eq!(used_flags(ConditionCode::Ule), flags::CF | flags::ZF);
    }

    #[test]
    fn test_code_address_opcodes() {
        assert!(Opcode::Jne.takes_code_address());
        assert!(Opcode::Call.takes_code_address());
        assert!(!Opcode::Cmove.takes_code_address());
        assert!(!Opcode::Add.takes_code_address());
    }
}
