//! RTL instructions and the clusters that group them per machine instruction.

use std::fmt;

use serde::Serialize;

use super::expression::Expression;
use crate::Address;

/// A single register-transfer operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RtlInstruction {
    Assign {
        dst: Expression,
        src: Expression,
    },
    /// Conditional jump to `target`; falls through otherwise.
    Branch {
        condition: Expression,
        target: Address,
    },
    Goto {
        target: Expression,
    },
    Call {
        target: Expression,
        return_address_size: u8,
    },
    Return {
        return_address_size: u8,
        extra_bytes: u32,
    },
    /// An expression evaluated only for its effect.
    SideEffect(Expression),
    /// `instr` executes only when `condition` holds.
    If {
        condition: Expression,
        instr: Box<RtlInstruction>,
    },
    Nop,
    Invalid,
}

impl fmt::Display for RtlInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtlInstruction::Assign { dst, src } => write!(f, "{} = {}", dst, src),
            RtlInstruction::Branch { condition, target } => {
                write!(f, "if ({}) branch {:08X}", condition, target)
            }
            RtlInstruction::Goto { target } => write!(f, "goto {}", target),
            RtlInstruction::Call {
                target,
                return_address_size,
            } => write!(f, "call {} ({})", target, return_address_size),
            RtlInstruction::Return {
                return_address_size,
                extra_bytes,
            } => write!(f, "return ({},{})", return_address_size, extra_bytes),
            RtlInstruction::SideEffect(e) => write!(f, "{}", e),
            RtlInstruction::If { condition, instr } => write!(f, "if ({}) {}", condition, instr),
            RtlInstruction::Nop => write!(f, "nop"),
            RtlInstruction::Invalid => write!(f, "<invalid>"),
        }
    }
}

/// Control-flow classification of a whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RtlClass {
    /// Falls through to the next instruction.
    Linear,
    /// Unconditional transfer of control.
    Transfer,
    /// May or may not transfer control.
    ConditionalTransfer,
    Call,
    Return,
    /// Execution does not continue (halt, reset).
    Terminates,
    Invalid,
}

impl RtlClass {
    /// Whether execution can never fall through to the next address.
    pub fn ends_trace(self) -> bool {
        matches!(
            self,
            RtlClass::Transfer | RtlClass::Return | RtlClass::Terminates | RtlClass::Invalid
        )
    }
}

impl fmt::Display for RtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RtlClass::Linear => "linear",
            RtlClass::Transfer => "transfer",
            RtlClass::ConditionalTransfer => "conditional",
            RtlClass::Call => "call",
            RtlClass::Return => "return",
            RtlClass::Terminates => "terminates",
            RtlClass::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// The RTL produced for one machine instruction (or one merged group).
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionCluster {
    /// Address of the first machine instruction covered.
    pub address: Address,
    /// Total length in bytes of the machine instructions covered.
    pub length: u32,
    pub class: RtlClass,
    pub instructions: Vec<RtlInstruction>,
}

impl InstructionCluster {
    pub fn new(address: Address, length: u32, class: RtlClass, instructions: Vec<RtlInstruction>) -> Self {
        Self {
            address,
            length,
            class,
            instructions,
        }
    }

    /// Address just past the covered machine code.
    pub fn end_address(&self) -> Address {
        self.address + self.length as Address
    }

    /// Each RTL instruction rendered as text.
    pub fn rendered(&self) -> Vec<String> {
        self.instructions.iter().map(|i| i.to_string()).collect()
    }
}

impl fmt::Display for InstructionCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:08X}({}): {}", self.address, self.length, self.class)?;
        for instr in &self.instructions {
            writeln!(f, "    {}", instr)?;
        }
        Ok(())
    }
}
