//! Decoded x86 instructions.

use std::fmt;

use super::opcodes::Opcode;
use super::operands::Operand;
use crate::ir::DataType;
use crate::{Address, MachineInstruction};

/// Repeat prefix attached to a string instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepPrefix {
    #[default]
    None,
    /// `rep` / `repe`
    Rep,
    /// `repne`
    Repne,
}

#[derive(Debug, Clone, PartialEq)]
pub struct X86Instruction {
    pub address: Address,
    pub length: u32,
    pub opcode: Opcode,
    /// Mnemonic as decoded, kept for diagnostics on unrecognized opcodes.
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub rep: RepPrefix,
    /// Operand size in effect.
    pub data_width: DataType,
    /// Address size in effect.
    pub address_width: DataType,
}

impl X86Instruction {
    pub fn new(address: Address, length: u32, opcode: Opcode, operands: Vec<Operand>, address_width: DataType) -> Self {
        let data_width = operands
            .first()
            .map(Operand::width)
            .unwrap_or(address_width);
        Self {
            address,
            length,
            opcode,
            mnemonic: opcode.name().to_string(),
            operands,
            rep: RepPrefix::None,
            data_width,
            address_width,
        }
    }

    pub fn op(&self, i: usize) -> Option<&Operand> {
        self.operands.get(i)
    }

    /// Address of the following instruction.
    pub fn next_address(&self) -> Address {
        self.address + self.length as Address
    }
}

impl MachineInstruction for X86Instruction {
    fn address(&self) -> Address {
        self.address
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn mnemonic(&self) -> String {
        self.mnemonic.clone()
    }
}

impl fmt::Display for X86Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rep {
            RepPrefix::Rep => write!(f, "rep ")?,
            RepPrefix::Repne => write!(f, "repne ")?,
            RepPrefix::None => {}
        }
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { "\t" } else { "," }, op)?;
        }
        Ok(())
    }
}
