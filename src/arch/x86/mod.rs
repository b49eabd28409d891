//! x86 back-end: operand model, Capstone-fed instructions and the rewriter.

pub mod instruction;
pub mod opcodes;
pub mod operands;
pub mod registers;
pub mod rewriter;

pub use instruction::{RepPrefix, X86Instruction};
pub use opcodes::Opcode;
pub use operands::{MemoryOperand, Operand, X86Storage};
pub use registers::Register;
pub use rewriter::X86Rewriter;

use crate::ir::DataType;
use crate::{Architecture, LiftError};

/// Processor mode, which fixes default operand, address and stack widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X86Mode {
    Real16,
    Protected32,
    Long64,
}

impl X86Mode {
    pub fn from_architecture(arch: Architecture) -> Result<Self, LiftError> {
        match arch {
            Architecture::X86_16 => Ok(X86Mode::Real16),
            Architecture::X86_32 => Ok(X86Mode::Protected32),
            Architecture::X86_64 => Ok(X86Mode::Long64),
            other => Err(LiftError::UnsupportedArchitecture(other)),
        }
    }

    pub fn architecture(self) -> Architecture {
        match self {
            X86Mode::Real16 => Architecture::X86_16,
            X86Mode::Protected32 => Architecture::X86_32,
            X86Mode::Long64 => Architecture::X86_64,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            X86Mode::Real16 => 16,
            X86Mode::Protected32 => 32,
            X86Mode::Long64 => 64,
        }
    }

    /// Native word, also the width of stack slots and addresses.
    pub fn word(self) -> DataType {
        DataType::word(self.bits())
    }

    pub fn pointer_size(self) -> u8 {
        (self.bits() / 8) as u8
    }

    /// `reg` resized to the mode's native width.
    pub fn native(self, reg: Register) -> Register {
        reg.with_width(self.bits()).unwrap_or(reg)
    }

    pub fn stack_pointer(self) -> Register {
        self.native(Register::SP)
    }

    pub fn frame_pointer(self) -> Register {
        self.native(Register::BP)
    }

    /// Real mode addresses through segments; the other modes are flat.
    pub fn is_segmented(self) -> bool {
        self == X86Mode::Real16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_registers() {
        assert_eq!(X86Mode::Protected32.stack_pointer(), Register::ESP);
        assert_eq!(X86Mode::Long64.frame_pointer(), Register::RBP);
        assert_eq!(X86Mode::Real16.native(Register::ECX), Register::CX);
        assert_eq!(X86Mode::Long64.pointer_size(), 8);
    }

    #[test]
    fn test_mode_from_architecture() {
        assert_eq!(X86Mode::from_architecture(Architecture::X86_16).unwrap(), X86Mode::Real16);
        assert!(X86Mode::from_architecture(Architecture::Pic18).is_err());
    }
}
