//! Decoded PIC18 instructions.

use super::opcodes::Opcode;
use super::operands::Operand;
use super::registers::RegisterCatalog;
use crate::{Address, MachineInstruction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pic18Instruction {
    pub address: Address,
    /// 2, 4 or 6 bytes for instructions; directives cover their payload.
    pub length: u32,
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Pic18Instruction {
    pub fn new(address: Address, length: u32, opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            address,
            length,
            opcode,
            operands,
        }
    }

    /// A one-word instruction that does not decode.
    pub fn invalid(address: Address) -> Self {
        Self::new(address, 2, Opcode::Invalid, Vec::new())
    }

    pub fn op(&self, i: usize) -> Option<&Operand> {
        self.operands.get(i)
    }

    pub fn next_address(&self) -> Address {
        self.address + self.length as Address
    }

    /// Assembly text such as `ADDWF\tSTATUS,W,ACCESS`.
    pub fn render(&self, catalog: &RegisterCatalog) -> String {
        let operands: Vec<String> = self
            .operands
            .iter()
            .map(|op| op.render(catalog))
            .filter(|text| !text.is_empty())
            .collect();
        if operands.is_empty() {
            self.opcode.name().to_string()
        } else {
            format!("{}\t{}", self.opcode, operands.join(","))
        }
    }
}

impl MachineInstruction for Pic18Instruction {
    fn address(&self) -> Address {
        self.address
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn mnemonic(&self) -> String {
        self.opcode.name().to_string()
    }
}
