//! Decode errors shared by all back-ends, and the Capstone-based x86 decoder.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use capstone::arch::x86::{ArchMode, X86Operand, X86OperandType};
use capstone::arch::ArchOperand;
use capstone::prelude::*;
use capstone::Insn;

use crate::arch::x86::{MemoryOperand, Opcode, Operand, Register, RepPrefix, X86Instruction, X86Mode};
use crate::ir::DataType;
use crate::{Address, Architecture, Decoder, LiftError};

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input ends in the middle of an instruction
    #[error("Truncated instruction at 0x{address:X}: needs {needed} bytes, {available} available")]
    Truncated {
        address: Address,
        needed: usize,
        available: usize,
    },

    /// The bytes do not form an instruction
    #[error("Invalid encoding at 0x{address:X}: {reason}")]
    InvalidEncoding { address: Address, reason: String },

    /// Capstone error
    #[error("Capstone error: {0}")]
    Capstone(#[from] capstone::Error),
}

impl DecodeError {
    pub fn invalid(address: Address, reason: impl Into<String>) -> Self {
        DecodeError::InvalidEncoding {
            address,
            reason: reason.into(),
        }
    }

    pub fn truncated(address: Address, needed: usize, available: usize) -> Self {
        DecodeError::Truncated {
            address,
            needed,
            available,
        }
    }

    /// Address the failure was detected at, when known.
    pub fn address(&self) -> Option<Address> {
        match self {
            DecodeError::Truncated { address, .. } | DecodeError::InvalidEncoding { address, .. } => {
                Some(*address)
            }
            DecodeError::Capstone(_) => None,
        }
    }
}

thread_local! {
    // One Capstone handle per mode and thread; handles are not Send.
    static CS_POOL: RefCell<HashMap<X86Mode, Rc<Capstone>>> = RefCell::new(HashMap::new());
}

/// Longest x86 encoding.
const MAX_X86_INSTRUCTION: usize = 15;

/// x86 decoder backed by Capstone with operand detail enabled.
#[derive(Debug, Clone, Copy)]
pub struct CapstoneDecoder {
    mode: X86Mode,
}

impl CapstoneDecoder {
    pub fn new(mode: X86Mode) -> Self {
        Self { mode }
    }

    /// Create a decoder for a specific architecture
    pub fn for_architecture(arch: Architecture) -> Result<Self, LiftError> {
        Ok(Self::new(X86Mode::from_architecture(arch)?))
    }

    pub fn mode(&self) -> X86Mode {
        self.mode
    }

    fn build(mode: X86Mode) -> Result<Capstone, DecodeError> {
        let arch_mode = match mode {
            X86Mode::Real16 => ArchMode::Mode16,
            X86Mode::Protected32 => ArchMode::Mode32,
            X86Mode::Long64 => ArchMode::Mode64,
        };
        Ok(Capstone::new().x86().mode(arch_mode).detail(true).build()?)
    }

    fn with_capstone<T>(
        &self,
        f: impl FnOnce(&Capstone) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        let cs = CS_POOL.with(|cell| -> Result<Rc<Capstone>, DecodeError> {
            let mut pool = cell.borrow_mut();
            if let Some(cs) = pool.get(&self.mode) {
                return Ok(Rc::clone(cs));
            }
            let cs = Rc::new(Self::build(self.mode)?);
            pool.insert(self.mode, Rc::clone(&cs));
            Ok(cs)
        })?;
        f(&cs)
    }

    fn convert(&self, cs: &Capstone, insn: &Insn) -> Result<X86Instruction, DecodeError> {
        let address = insn.address();
        let (rep, mnemonic) = split_prefix(insn.mnemonic().unwrap_or(""));
        let mut opcode = Opcode::from_mnemonic(mnemonic);

        let detail = cs.insn_detail(insn)?;
        let mut operands = Vec::new();
        for op in detail.arch_detail().operands() {
            let ArchOperand::X86Operand(op) = op else {
                continue;
            };
            match self.operand(cs, &op, opcode) {
                Some(operand) => operands.push(operand),
                None => {
                    log::trace!("unknown operand in '{}' at 0x{:x}", mnemonic, address);
                    opcode = Opcode::Unrecognized;
                }
            }
        }

        let mut instr = X86Instruction::new(
            address,
            insn.bytes().len() as u32,
            opcode,
            operands,
            self.mode.word(),
        );
        instr.mnemonic = mnemonic.to_string();
        instr.rep = rep;
        Ok(instr)
    }

    fn operand(&self, cs: &Capstone, op: &X86Operand, opcode: Opcode) -> Option<Operand> {
        let width = operand_width(op.size, self.mode);
        match &op.op_type {
            X86OperandType::Reg(reg) => register(cs, *reg).map(Operand::Register),
            X86OperandType::Imm(value) if opcode.takes_code_address() => {
                Some(Operand::Address(*value as Address))
            }
            X86OperandType::Imm(value) => Some(Operand::imm(*value, width)),
            X86OperandType::Mem(mem) => {
                let optional = |id: RegId| -> Option<Option<Register>> {
                    if id.0 == 0 {
                        Some(None)
                    } else {
                        register(cs, id).map(Some)
                    }
                };
                Some(Operand::Memory(MemoryOperand {
                    width,
                    segment: optional(mem.segment())?,
                    base: optional(mem.base())?,
                    index: optional(mem.index())?,
                    scale: mem.scale().clamp(1, 8) as u8,
                    displacement: mem.disp(),
                }))
            }
            _ => None,
        }
    }
}

fn register(cs: &Capstone, id: RegId) -> Option<Register> {
    cs.reg_name(id).as_deref().and_then(Register::by_name)
}

fn operand_width(size: u8, mode: X86Mode) -> DataType {
    match size {
        0 => mode.word(),
        10 => DataType::Real80,
        n => DataType::word(n as u32 * 8),
    }
}

/// Split a Capstone mnemonic such as `rep movsb` into its repeat prefix
/// and the instruction proper. `lock` is dropped.
fn split_prefix(mnemonic: &str) -> (RepPrefix, &str) {
    let Some((prefix, rest)) = mnemonic.split_once(' ') else {
        return (RepPrefix::None, mnemonic);
    };
    let rest = rest.trim();
    match prefix {
        "rep" | "repe" | "repz" => (RepPrefix::Rep, rest),
        "repne" | "repnz" => (RepPrefix::Repne, rest),
        "lock" => split_prefix(rest),
        _ => (RepPrefix::None, mnemonic),
    }
}

impl fmt::Display for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneDecoder::{}", self.architecture())
    }
}

impl Decoder for CapstoneDecoder {
    type Instr = X86Instruction;

    fn architecture(&self) -> Architecture {
        self.mode.architecture()
    }

    fn decode(&self, bytes: &[u8], address: Address) -> Result<Option<X86Instruction>, DecodeError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let window = &bytes[..bytes.len().min(MAX_X86_INSTRUCTION)];
        self.with_capstone(|cs| {
            let insns = cs.disasm_count(window, address, 1)?;
            match insns.iter().next() {
                Some(insn) => self.convert(cs, insn).map(Some),
                None => Err(DecodeError::invalid(address, "capstone could not decode")),
            }
        })
    }
}
