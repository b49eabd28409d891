//! IR expressions: identifiers, constants and the operator tree built on them.

use std::fmt;
use std::sync::Arc;

use super::types::DataType;
use crate::pseudo::PseudoProcedure;
use crate::Address;

/// Where an identifier lives in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Storage {
    /// A machine register. `number` is the data address for memory-mapped
    /// registers and the register family index otherwise.
    Register {
        number: u32,
        bit_offset: u32,
        bit_size: u32,
    },
    /// A subset of the bits of a flag register.
    FlagGroup { register: String, mask: u32 },
    /// A cluster-local temporary.
    Temporary(u32),
}

/// A named storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub name: String,
    pub data_type: DataType,
    pub storage: Storage,
}

impl Identifier {
    pub fn register(name: impl Into<String>, data_type: DataType, number: u32) -> Self {
        Self {
            name: name.into(),
            data_type,
            storage: Storage::Register {
                number,
                bit_offset: 0,
                bit_size: data_type.bit_size(),
            },
        }
    }

    /// Sub-register occupying `bit_size` bits at `bit_offset` of register family `number`.
    pub fn sub_register(
        name: impl Into<String>,
        data_type: DataType,
        number: u32,
        bit_offset: u32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            storage: Storage::Register {
                number,
                bit_offset,
                bit_size: data_type.bit_size(),
            },
        }
    }

    /// Flag group made of the bits in `mask` of `register`. A single bit is
    /// typed `bool`, wider groups `byte`.
    pub fn flag_group(name: impl Into<String>, register: impl Into<String>, mask: u32) -> Self {
        let data_type = if mask.count_ones() == 1 {
            DataType::Bool
        } else {
            DataType::Byte
        };
        Self {
            name: name.into(),
            data_type,
            storage: Storage::FlagGroup {
                register: register.into(),
                mask,
            },
        }
    }

    pub fn temporary(index: u32, data_type: DataType) -> Self {
        Self {
            name: format!("v{}", index),
            data_type,
            storage: Storage::Temporary(index),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A typed literal. Real constants keep their IEEE bits in `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant {
    pub value: u64,
    pub data_type: DataType,
}

impl Constant {
    pub fn new(value: u64, data_type: DataType) -> Self {
        Self {
            value: value & data_type.mask(),
            data_type,
        }
    }

    pub fn real64(value: f64) -> Self {
        Self {
            value: value.to_bits(),
            data_type: DataType::Real64,
        }
    }

    pub fn bool(value: bool) -> Self {
        Self::new(value as u64, DataType::Bool)
    }

    /// Value sign-extended from the constant's width.
    pub fn signed(&self) -> i64 {
        let bits = self.data_type.bit_size();
        if bits == 0 || bits >= 64 {
            return self.value as i64;
        }
        let shift = 64 - bits;
        ((self.value << shift) as i64) >> shift
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data_type {
            DataType::Bool => write!(f, "{}", self.value != 0),
            DataType::Real64 => write!(f, "{:?}", f64::from_bits(self.value)),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 | DataType::Int128 => {
                write!(f, "{}", self.signed())
            }
            dt => write!(f, "0x{:0width$X}", self.value, width = dt.hex_digits()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    IAdd,
    ISub,
    IMul,
    SMul,
    UMul,
    SDiv,
    UDiv,
    SMod,
    UMod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuit conjunction of two boolean expressions.
    CAnd,
    /// Short-circuit disjunction of two boolean expressions.
    COr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::IAdd => "+",
            BinaryOp::ISub => "-",
            BinaryOp::IMul => "*",
            BinaryOp::SMul => "*s",
            BinaryOp::UMul => "*u",
            BinaryOp::SDiv => "/",
            BinaryOp::UDiv => "/u",
            BinaryOp::SMod => "%s",
            BinaryOp::UMod => "%u",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>u",
            BinaryOp::Sar => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ult => "<u",
            BinaryOp::Ule => "<=u",
            BinaryOp::Ugt => ">u",
            BinaryOp::Uge => ">=u",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::CAnd => "&&",
            BinaryOp::COr => "||",
            BinaryOp::FAdd => "+",
            BinaryOp::FSub => "-",
            BinaryOp::FMul => "*",
            BinaryOp::FDiv => "/",
        }
    }

    /// Comparison operators always produce `bool`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Ult
                | BinaryOp::Ule
                | BinaryOp::Ugt
                | BinaryOp::Uge
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::CAnd
                | BinaryOp::COr
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Bitwise complement.
    Comp,
    /// Two's complement negation.
    Neg,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Comp => "~",
            UnaryOp::Neg => "-",
        }
    }
}

/// Condition tested against a flag group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionCode {
    Ugt,
    Ule,
    Ult,
    Uge,
    Gt,
    Le,
    Lt,
    Ge,
    Eq,
    Ne,
    Ov,
    No,
    Sg,
    Ns,
    Pe,
    Po,
}

impl ConditionCode {
    /// The condition that holds exactly when `self` does not.
    pub fn invert(self) -> ConditionCode {
        match self {
            ConditionCode::Ugt => ConditionCode::Ule,
            ConditionCode::Ule => ConditionCode::Ugt,
            ConditionCode::Ult => ConditionCode::Uge,
            ConditionCode::Uge => ConditionCode::Ult,
            ConditionCode::Gt => ConditionCode::Le,
            ConditionCode::Le => ConditionCode::Gt,
            ConditionCode::Lt => ConditionCode::Ge,
            ConditionCode::Ge => ConditionCode::Lt,
            ConditionCode::Eq => ConditionCode::Ne,
            ConditionCode::Ne => ConditionCode::Eq,
            ConditionCode::Ov => ConditionCode::No,
            ConditionCode::No => ConditionCode::Ov,
            ConditionCode::Sg => ConditionCode::Ns,
            ConditionCode::Ns => ConditionCode::Sg,
            ConditionCode::Pe => ConditionCode::Po,
            ConditionCode::Po => ConditionCode::Pe,
        }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConditionCode::Ugt => "UGT",
            ConditionCode::Ule => "ULE",
            ConditionCode::Ult => "ULT",
            ConditionCode::Uge => "UGE",
            ConditionCode::Gt => "GT",
            ConditionCode::Le => "LE",
            ConditionCode::Lt => "LT",
            ConditionCode::Ge => "GE",
            ConditionCode::Eq => "EQ",
            ConditionCode::Ne => "NE",
            ConditionCode::Ov => "OV",
            ConditionCode::No => "NO",
            ConditionCode::Sg => "SG",
            ConditionCode::Ns => "NS",
            ConditionCode::Pe => "PE",
            ConditionCode::Po => "PO",
        };
        f.write_str(name)
    }
}

/// An IR expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Id(Identifier),
    Const(Constant),
    /// A code address, as used by jumps and calls.
    CodeAddress(Address),
    Binary {
        op: BinaryOp,
        data_type: DataType,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        data_type: DataType,
        operand: Box<Expression>,
    },
    /// Memory access at effective address `ea`, optionally segmented.
    Mem {
        segment: Option<Box<Expression>>,
        ea: Box<Expression>,
        data_type: DataType,
    },
    /// Concatenation of `head` (high part) and `tail` (low part).
    Seq {
        data_type: DataType,
        head: Box<Expression>,
        tail: Box<Expression>,
    },
    /// `data_type`-wide bit slice of `expr` starting at `offset`.
    Slice {
        data_type: DataType,
        expr: Box<Expression>,
        offset: u32,
    },
    Cast {
        data_type: DataType,
        expr: Box<Expression>,
    },
    /// Condition codes produced by evaluating `expr`.
    Cond(Box<Expression>),
    /// Test of a condition code against a flag group.
    Test {
        cc: ConditionCode,
        flags: Box<Expression>,
    },
    /// Invocation of a pseudo-procedure.
    Application {
        procedure: Arc<PseudoProcedure>,
        data_type: DataType,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn data_type(&self) -> DataType {
        match self {
            Expression::Id(id) => id.data_type,
            Expression::Const(c) => c.data_type,
            Expression::CodeAddress(_) => DataType::Ptr32,
            Expression::Binary { data_type, .. }
            | Expression::Unary { data_type, .. }
            | Expression::Mem { data_type, .. }
            | Expression::Seq { data_type, .. }
            | Expression::Slice { data_type, .. }
            | Expression::Cast { data_type, .. }
            | Expression::Application { data_type, .. } => *data_type,
            Expression::Cond(_) => DataType::Byte,
            Expression::Test { .. } => DataType::Bool,
        }
    }

    pub fn as_identifier(&self) -> Option<&Identifier> {
        match self {
            Expression::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self, Expression::Id(_))
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expression::Const(c) => Some(c),
            _ => None,
        }
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expression::Binary { .. } | Expression::Unary { .. } | Expression::Cast { .. }
        )
    }
}

impl From<Identifier> for Expression {
    fn from(id: Identifier) -> Self {
        Expression::Id(id)
    }
}

impl From<&Identifier> for Expression {
    fn from(id: &Identifier) -> Self {
        Expression::Id(id.clone())
    }
}

impl From<Constant> for Expression {
    fn from(c: Constant) -> Self {
        Expression::Const(c)
    }
}

/// Operand of an infix operator, parenthesized when compound.
struct Nested<'a>(&'a Expression);

impl fmt::Display for Nested<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_compound() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Id(id) => write!(f, "{}", id),
            Expression::Const(c) => write!(f, "{}", c),
            Expression::CodeAddress(a) => write!(f, "{:08X}", a),
            Expression::Binary {
                op, left, right, ..
            } => write!(f, "{} {} {}", Nested(left), op.symbol(), Nested(right)),
            Expression::Unary { op, operand, .. } => {
                write!(f, "{}{}", op.symbol(), Nested(operand))
            }
            Expression::Mem {
                segment,
                ea,
                data_type,
            } => match segment {
                Some(seg) => write!(f, "Mem[{}:{}:{}]", seg, ea, data_type),
                None => write!(f, "Mem[{}:{}]", ea, data_type),
            },
            Expression::Seq { head, tail, .. } => write!(f, "SEQ({}, {})", head, tail),
            Expression::Slice {
                data_type,
                expr,
                offset,
            } => write!(f, "SLICE({}, {}, {})", expr, data_type, offset),
            Expression::Cast { data_type, expr } => write!(f, "({}) {}", data_type, Nested(expr)),
            Expression::Cond(e) => write!(f, "cond({})", e),
            Expression::Test { cc, flags } => write!(f, "Test({},{})", cc, flags),
            Expression::Application { procedure, args, .. } => {
                write!(f, "{}(", procedure.name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_reg(name: &str) -> Expression {
        Identifier::register(name, DataType::Byte, 0).into()
    }

    #[test]
    fn test_constant_rendering() {
        assert_eq!(Constant::new(5, DataType::Byte).to_string(), "0x05");
        assert_eq!(Constant::new(0x1FF, DataType::Byte).to_string(), "0xFF");
        assert_eq!(Constant::new(0xFFFE, DataType::Int16).to_string(), "-2");
        assert_eq!(Constant::bool(true).to_string(), "true");
        assert_eq!(Constant::real64(1.0).to_string(), "1.0");
    }

    #[test]
    fn test_nested_binary_is_parenthesized() {
        let sum = Expression::Binary {
            op: BinaryOp::IAdd,
            data_type: DataType::Byte,
            left: Box::new(byte_reg("W")),
            right: Box::new(byte_reg("f")),
        };
        let outer = Expression::Binary {
            op: BinaryOp::IAdd,
            data_type: DataType::Byte,
            left: Box::new(sum),
            right: Box::new(byte_reg("C")),
        };
        assert_eq!(outer.to_string(), "(W + f) + C");
    }

    #[test]
    fn test_memory_and_test_rendering() {
        let mem = Expression::Mem {
            segment: None,
            ea: Box::new(Constant::new(0x20, DataType::Ptr16).into()),
            data_type: DataType::Byte,
        };
        assert_eq!(mem.to_string(), "Mem[0x0020:byte]");
        let test = Expression::Test {
            cc: ConditionCode::Eq,
            flags: Box::new(Identifier::flag_group("Z", "STATUS", 4).into()),
        };
        assert_eq!(test.to_string(), "Test(EQ,Z)");
        assert_eq!(test.data_type(), DataType::Bool);
    }

    #[test]
    fn test_condition_inversion_is_involutive() {
        for cc in [ConditionCode::Ugt, ConditionCode::Lt, ConditionCode::Pe, ConditionCode::Ov] {
            assert_eq!(cc.invert().invert(), cc);
            assert_ne!(cc.invert(), cc);
        }
    }
}
