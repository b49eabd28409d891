//! Architecture-neutral register-transfer IR.
//!
//! Every back-end lowers machine instructions into [`InstructionCluster`]s made
//! of [`RtlInstruction`]s over [`Expression`] trees.

pub mod expression;
pub mod instruction;
pub mod types;

pub use expression::{BinaryOp, ConditionCode, Constant, Expression, Identifier, Storage, UnaryOp};
pub use instruction::{InstructionCluster, RtlClass, RtlInstruction};
pub use types::DataType;
