//! x86 operands.

use std::fmt;

use super::registers::Register;
use super::X86Mode;
use crate::arch::OperandAccess;
use crate::ir::DataType;
use crate::Address;

/// A memory reference: `segment:[base + index*scale + displacement]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOperand {
    pub width: DataType,
    pub segment: Option<Register>,
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
    pub displacement: i64,
}

impl MemoryOperand {
    /// An absolute reference with no registers.
    pub fn absolute(width: DataType, displacement: i64) -> Self {
        Self {
            width,
            segment: None,
            base: None,
            index: None,
            scale: 1,
            displacement,
        }
    }

    pub fn based(width: DataType, base: Register, displacement: i64) -> Self {
        Self {
            base: Some(base),
            ..Self::absolute(width, displacement)
        }
    }

    /// Whether the displacement is relative to the next instruction.
    pub fn is_ip_relative(&self) -> bool {
        matches!(self.base, Some(Register::RIP) | Some(Register::EIP))
    }

    /// The segment register applied in `mode`. Real mode defaults to SS for
    /// BP- and SP-based references and DS otherwise; flat modes only honour
    /// FS and GS overrides.
    pub fn segment_in(&self, mode: X86Mode) -> Option<Register> {
        let segment = self.segment.or_else(|| {
            if !mode.is_segmented() {
                None
            } else if matches!(self.base, Some(Register::BP) | Some(Register::SP)) {
                Some(Register::SS)
            } else {
                Some(Register::DS)
            }
        });
        segment.filter(|seg| mode.is_segmented() || matches!(*seg, Register::FS | Register::GS))
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = match self.width.bit_size() {
            8 => "byte",
            16 => "word",
            32 => "dword",
            64 => "qword",
            80 => "tbyte",
            _ => "",
        };
        if !size.is_empty() {
            write!(f, "{} ptr ", size)?;
        }
        if let Some(seg) = self.segment {
            write!(f, "{}:", seg)?;
        }
        write!(f, "[")?;
        let mut wrote = false;
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
            wrote = true;
        }
        if let Some(index) = self.index {
            if wrote {
                write!(f, "+")?;
            }
            write!(f, "{}", index)?;
            if self.scale > 1 {
                write!(f, "*{}", self.scale)?;
            }
            wrote = true;
        }
        if self.displacement != 0 || !wrote {
            if wrote {
                if self.displacement < 0 {
                    write!(f, "-0x{:x}", self.displacement.unsigned_abs())?;
                } else {
                    write!(f, "+0x{:x}", self.displacement)?;
                }
            } else {
                write!(f, "0x{:x}", self.displacement)?;
            }
        }
        write!(f, "]")
    }
}

/// A storage location an x86 operand can touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum X86Storage {
    Register(Register),
    /// A memory reference with its effective segment filled in.
    Memory(MemoryOperand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Immediate { value: i64, width: DataType },
    Memory(MemoryOperand),
    /// Direct code target of a jump or call.
    Address(Address),
}

impl Operand {
    pub fn imm(value: i64, width: DataType) -> Self {
        Operand::Immediate { value, width }
    }

    pub fn width(&self) -> DataType {
        match self {
            Operand::Register(r) => r.data_type(),
            Operand::Immediate { width, .. } => *width,
            Operand::Memory(m) => m.width,
            Operand::Address(_) => DataType::Ptr32,
        }
    }

    pub fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Register(r) => Some(*r),
            _ => None,
        }
    }

    /// Storage the operand touches in `mode`. A memory operand reads its
    /// segment, base and index registers; an instruction-relative base is
    /// folded into the address and is not a read.
    pub fn accesses(&self, mode: X86Mode) -> OperandAccess<X86Storage> {
        let mut access = OperandAccess::default();
        match self {
            Operand::Register(r) => access.target.push(X86Storage::Register(*r)),
            Operand::Immediate { .. } | Operand::Address(_) => {}
            Operand::Memory(mem) => {
                let segment = mem.segment_in(mode);
                let base = mem.base.filter(|_| !mem.is_ip_relative());
                access.reads.extend(
                    [segment, base, mem.index]
                        .into_iter()
                        .flatten()
                        .map(X86Storage::Register),
                );
                access.target.push(X86Storage::Memory(MemoryOperand {
                    segment,
                    ..mem.clone()
                }));
            }
        }
        access
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{}", r),
            Operand::Immediate { value, .. } => {
                if *value < 0 {
                    write!(f, "-0x{:x}", value.unsigned_abs())
                } else {
                    write!(f, "0x{:x}", value)
                }
            }
            Operand::Memory(m) => write!(f, "{}", m),
            Operand::Address(a) => write!(f, "0x{:x}", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_rendering() {
        let m = MemoryOperand {
            width: DataType::Word32,
            segment: None,
            base: Some(Register::EBX),
            index: Some(Register::ESI),
            scale: 4,
            displacement: -8,
        };
        assert_eq!(m.to_string(), "dword ptr [ebx+esi*4-0x8]");
        assert_eq!(
            MemoryOperand::absolute(DataType::Byte, 0x40).to_string(),
            "byte ptr [0x40]"
        );
    }

    #[test]
    fn test_register_and_immediate_accesses() {
        let acc = Operand::Register(Register::ECX).accesses(X86Mode::Protected32);
        assert!(acc.reads.is_empty());
        assert_eq!(acc.target, vec![X86Storage::Register(Register::ECX)]);
        assert!(Operand::imm(4, DataType::Byte).accesses(X86Mode::Protected32).is_empty());
        assert!(Operand::Address(0x1000).accesses(X86Mode::Long64).is_empty());
    }

    #[test]
    fn test_memory_accesses_read_address_registers() {
        let m = MemoryOperand {
            width: DataType::Word32,
            segment: None,
            base: Some(Register::EBX),
            index: Some(Register::ESI),
            scale: 4,
            displacement: 8,
        };
        let acc = Operand::Memory(m.clone()).accesses(X86Mode::Protected32);
        assert_eq!(
            acc.reads,
            vec![X86Storage::Register(Register::EBX), X86Storage::Register(Register::ESI)]
        );
        assert_eq!(acc.target, vec![X86Storage::Memory(m)]);
        assert!(acc.writes.is_empty());
    }

    #[test]
    fn test_memory_accesses_resolve_segments() {
        let bp = MemoryOperand::based(DataType::Word16, Register::BP, -2);
        let acc = Operand::Memory(bp.clone()).accesses(X86Mode::Real16);
        assert_eq!(
            acc.reads,
            vec![X86Storage::Register(Register::SS), X86Storage::Register(Register::BP)]
        );
        assert_eq!(
            acc.target,
            vec![X86Storage::Memory(MemoryOperand { segment: Some(Register::SS), ..bp })]
        );

        let si = MemoryOperand::based(DataType::Byte, Register::SI, 0);
        assert_eq!(si.segment_in(X86Mode::Real16), Some(Register::DS));

        let fs = MemoryOperand {
            segment: Some(Register::FS),
            ..MemoryOperand::absolute(DataType::Word64, 0x28)
        };
        assert_eq!(
            Operand::Memory(fs).accesses(X86Mode::Long64).reads,
            vec![X86Storage::Register(Register::FS)]
        );
        let ds = MemoryOperand {
            segment: Some(Register::DS),
            ..MemoryOperand::based(DataType::Word32, Register::EAX, 0)
        };
        assert_eq!(ds.segment_in(X86Mode::Protected32), None);

        let rip = MemoryOperand::based(DataType::Word64, Register::RIP, 0x100);
        assert!(Operand::Memory(rip).accesses(X86Mode::Long64).reads.is_empty());
    }

    #[test]
    fn test_operand_widths() {
        assert_eq!(Operand::Register(Register::AX).width(), DataType::Word16);
        assert_eq!(Operand::imm(-1, DataType::Byte).to_string(), "-0x1");
    }
}
