//! Architecture back-ends.

pub mod pic18;
pub mod x86;

/// Storage touched by one operand, as far as the operand's own encoding and
/// the device or mode context determine it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandAccess<L> {
    /// Storage read to form the operand (bank select, index and base
    /// registers) plus anything the encoding always reads.
    pub reads: Vec<L>,
    /// Storage the operand denotes. Whether it is read, written or both is
    /// up to the opcode.
    pub target: Vec<L>,
    /// Storage the encoding itself says is written.
    pub writes: Vec<L>,
}

impl<L> Default for OperandAccess<L> {
    fn default() -> Self {
        Self {
            reads: Vec::new(),
            target: Vec::new(),
            writes: Vec::new(),
        }
    }
}

impl<L> OperandAccess<L> {
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.target.is_empty() && self.writes.is_empty()
    }
}
