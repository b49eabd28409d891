//! Builder through which rewriters produce the RTL of one cluster.
//!
//! A fresh [`RtlEmitter`] is created per machine instruction. Temporaries are
//! numbered from zero within the cluster and never escape it.

use std::sync::Arc;

use crate::ir::{
    BinaryOp, ConditionCode, Constant, DataType, Expression, Identifier, RtlClass, RtlInstruction,
    UnaryOp,
};
use crate::pseudo::{PseudoProcedure, RewriterHost};
use crate::{Address, LiftError};

pub struct RtlEmitter<'h> {
    host: &'h dyn RewriterHost,
    instructions: Vec<RtlInstruction>,
    class: RtlClass,
    next_temporary: u32,
}

impl<'h> RtlEmitter<'h> {
    pub fn new(host: &'h dyn RewriterHost) -> Self {
        Self {
            host,
            instructions: Vec::new(),
            class: RtlClass::Linear,
            next_temporary: 0,
        }
    }

    /// Control-flow class of the cluster being built.
    pub fn class(&self) -> RtlClass {
        self.class
    }

    pub fn set_class(&mut self, class: RtlClass) {
        self.class = class;
    }

    /// Consume the emitter, yielding the cluster's class and instructions.
    pub fn finish(self) -> (RtlClass, Vec<RtlInstruction>) {
        (self.class, self.instructions)
    }

    // ---- statements ----

    pub fn assign(&mut self, dst: impl Into<Expression>, src: impl Into<Expression>) {
        self.instructions.push(RtlInstruction::Assign {
            dst: dst.into(),
            src: src.into(),
        });
    }

    /// Conditional branch. The cluster becomes a conditional transfer.
    pub fn branch(&mut self, condition: Expression, target: Address) {
        self.class = RtlClass::ConditionalTransfer;
        self.instructions.push(RtlInstruction::Branch { condition, target });
    }

    pub fn goto(&mut self, target: Expression) {
        self.class = RtlClass::Transfer;
        self.instructions.push(RtlInstruction::Goto { target });
    }

    pub fn call(&mut self, target: Expression, return_address_size: u8) {
        self.class = RtlClass::Call;
        self.instructions.push(RtlInstruction::Call {
            target,
            return_address_size,
        });
    }

    pub fn ret(&mut self, return_address_size: u8, extra_bytes: u32) {
        self.class = RtlClass::Return;
        self.instructions.push(RtlInstruction::Return {
            return_address_size,
            extra_bytes,
        });
    }

    pub fn side_effect(&mut self, expr: Expression) {
        self.instructions.push(RtlInstruction::SideEffect(expr));
    }

    /// Assignment guarded by `condition`.
    pub fn assign_if(
        &mut self,
        condition: Expression,
        dst: impl Into<Expression>,
        src: impl Into<Expression>,
    ) {
        self.instructions.push(RtlInstruction::If {
            condition,
            instr: Box::new(RtlInstruction::Assign {
                dst: dst.into(),
                src: src.into(),
            }),
        });
    }

    pub fn nop(&mut self) {
        self.instructions.push(RtlInstruction::Nop);
    }

    /// Replace whatever was emitted with a single invalid marker.
    pub fn invalid(&mut self) {
        self.instructions.clear();
        self.instructions.push(RtlInstruction::Invalid);
        self.class = RtlClass::Invalid;
    }

    /// A new cluster-local temporary of type `data_type`.
    pub fn temporary(&mut self, data_type: DataType) -> Identifier {
        let id = Identifier::temporary(self.next_temporary, data_type);
        self.next_temporary += 1;
        id
    }

    // ---- pseudo-procedures ----

    pub fn pseudo_procedure(
        &self,
        name: &str,
        return_type: DataType,
        arity: usize,
    ) -> Result<Arc<PseudoProcedure>, LiftError> {
        self.host.ensure_pseudo_procedure(name, return_type, arity)
    }

    /// Application of pseudo-procedure `name` to `args`, yielding a value
    /// of type `data_type`.
    pub fn fn_call(
        &self,
        name: &str,
        data_type: DataType,
        args: Vec<Expression>,
    ) -> Result<Expression, LiftError> {
        let procedure = self.pseudo_procedure(name, data_type, args.len())?;
        Ok(Expression::Application {
            procedure,
            data_type,
            args,
        })
    }

    // ---- expressions ----

    pub fn word(&self, value: u64, data_type: DataType) -> Expression {
        Constant::new(value, data_type).into()
    }

    pub fn byte(&self, value: u8) -> Expression {
        self.word(value as u64, DataType::Byte)
    }

    pub fn bool(&self, value: bool) -> Expression {
        Constant::bool(value).into()
    }

    pub fn binary(&self, op: BinaryOp, data_type: DataType, a: Expression, b: Expression) -> Expression {
        Expression::Binary {
            op,
            data_type,
            left: Box::new(a),
            right: Box::new(b),
        }
    }

    fn same_width(&self, op: BinaryOp, a: Expression, b: Expression) -> Expression {
        let dt = a.data_type();
        self.binary(op, dt, a, b)
    }

    fn compare(&self, op: BinaryOp, a: Expression, b: Expression) -> Expression {
        self.binary(op, DataType::Bool, a, b)
    }

    pub fn iadd(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::IAdd, a, b)
    }

    pub fn isub(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::ISub, a, b)
    }

    /// `a + imm`, with the constant typed like `a`.
    pub fn add_imm(&self, a: Expression, imm: i64) -> Expression {
        let dt = a.data_type();
        if imm < 0 {
            let k = self.word(imm.unsigned_abs(), dt);
            self.isub(a, k)
        } else {
            let k = self.word(imm as u64, dt);
            self.iadd(a, k)
        }
    }

    pub fn imul(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::IMul, a, b)
    }

    pub fn smul(&self, data_type: DataType, a: Expression, b: Expression) -> Expression {
        self.binary(BinaryOp::SMul, data_type, a, b)
    }

    pub fn umul(&self, data_type: DataType, a: Expression, b: Expression) -> Expression {
        self.binary(BinaryOp::UMul, data_type, a, b)
    }

    pub fn sdiv(&self, data_type: DataType, a: Expression, b: Expression) -> Expression {
        self.binary(BinaryOp::SDiv, data_type, a, b)
    }

    pub fn udiv(&self, data_type: DataType, a: Expression, b: Expression) -> Expression {
        self.binary(BinaryOp::UDiv, data_type, a, b)
    }

    pub fn smod(&self, data_type: DataType, a: Expression, b: Expression) -> Expression {
        self.binary(BinaryOp::SMod, data_type, a, b)
    }

    pub fn umod(&self, data_type: DataType, a: Expression, b: Expression) -> Expression {
        self.binary(BinaryOp::UMod, data_type, a, b)
    }

    pub fn and(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::And, a, b)
    }

    pub fn or(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::Or, a, b)
    }

    pub fn xor(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::Xor, a, b)
    }

    pub fn shl(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::Shl, a, b)
    }

    pub fn shr(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::Shr, a, b)
    }

    pub fn sar(&self, a: Expression, b: Expression) -> Expression {
        self.same_width(BinaryOp::Sar, a, b)
    }

    pub fn eq(&self, a: Expression, b: Expression) -> Expression {
        self.compare(BinaryOp::Eq, a, b)
    }

    pub fn ne(&self, a: Expression, b: Expression) -> Expression {
        self.compare(BinaryOp::Ne, a, b)
    }

    pub fn ult(&self, a: Expression, b: Expression) -> Expression {
        self.compare(BinaryOp::Ult, a, b)
    }

    pub fn ugt(&self, a: Expression, b: Expression) -> Expression {
        self.compare(BinaryOp::Ugt, a, b)
    }

    pub fn cand(&self, a: Expression, b: Expression) -> Expression {
        self.compare(BinaryOp::CAnd, a, b)
    }

    /// `e == 0`, with the zero typed like `e`.
    pub fn eq0(&self, e: Expression) -> Expression {
        let zero = self.word(0, e.data_type());
        self.eq(e, zero)
    }

    /// `e != 0`, with the zero typed like `e`.
    pub fn ne0(&self, e: Expression) -> Expression {
        let zero = self.word(0, e.data_type());
        self.ne(e, zero)
    }

    pub fn unary(&self, op: UnaryOp, e: Expression) -> Expression {
        let data_type = e.data_type();
        Expression::Unary {
            op,
            data_type,
            operand: Box::new(e),
        }
    }

    pub fn not(&self, e: Expression) -> Expression {
        self.unary(UnaryOp::Not, e)
    }

    pub fn comp(&self, e: Expression) -> Expression {
        self.unary(UnaryOp::Comp, e)
    }

    pub fn neg(&self, e: Expression) -> Expression {
        self.unary(UnaryOp::Neg, e)
    }

    pub fn mem(&self, data_type: DataType, ea: Expression) -> Expression {
        Expression::Mem {
            segment: None,
            ea: Box::new(ea),
            data_type,
        }
    }

    pub fn seg_mem(&self, data_type: DataType, segment: Expression, ea: Expression) -> Expression {
        Expression::Mem {
            segment: Some(Box::new(segment)),
            ea: Box::new(ea),
            data_type,
        }
    }

    pub fn seq(&self, data_type: DataType, head: Expression, tail: Expression) -> Expression {
        Expression::Seq {
            data_type,
            head: Box::new(head),
            tail: Box::new(tail),
        }
    }

    pub fn slice(&self, data_type: DataType, e: Expression, offset: u32) -> Expression {
        Expression::Slice {
            data_type,
            expr: Box::new(e),
            offset,
        }
    }

    pub fn cast(&self, data_type: DataType, e: Expression) -> Expression {
        Expression::Cast {
            data_type,
            expr: Box::new(e),
        }
    }

    pub fn cond(&self, e: Expression) -> Expression {
        Expression::Cond(Box::new(e))
    }

    pub fn test(&self, cc: ConditionCode, flags: impl Into<Expression>) -> Expression {
        Expression::Test {
            cc,
            flags: Box::new(flags.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudo::PseudoProcedureTable;

    #[test]
    fn test_temporaries_are_cluster_local() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        assert_eq!(m.temporary(DataType::Byte).name, "v0");
        assert_eq!(m.temporary(DataType::Byte).name, "v1");
        let mut next = RtlEmitter::new(&host);
        assert_eq!(next.temporary(DataType::Word16).name, "v0");
    }

    #[test]
    fn test_statement_kinds_set_class() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        assert_eq!(m.class(), RtlClass::Linear);
        let z = Identifier::flag_group("Z", "STATUS", 4);
        let cond = m.test(ConditionCode::Eq, z);
        m.branch(cond, 0x20);
        assert_eq!(m.class(), RtlClass::ConditionalTransfer);
        m.ret(0, 0);
        let (class, instrs) = m.finish();
        assert_eq!(class, RtlClass::Return);
        assert_eq!(instrs.len(), 2);
    }

    #[test]
    fn test_finish_yields_statements_in_order() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        let w = Identifier::register("W", DataType::Byte, 0xFE8);
        m.assign(w.clone(), Constant::new(1, DataType::Byte));
        m.nop();
        m.assign(w, Constant::new(2, DataType::Byte));
        let (_, instrs) = m.finish();
        let rendered: Vec<String> = instrs.iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered, vec!["W = 0x01", "nop", "W = 0x02"]);
    }

    #[test]
    fn test_invalid_discards_partial_output() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        m.nop();
        m.invalid();
        let (class, instrs) = m.finish();
        assert_eq!(class, RtlClass::Invalid);
        assert_eq!(instrs, vec![RtlInstruction::Invalid]);
    }

    #[test]
    fn test_fn_call_uses_shared_table() {
        let host = PseudoProcedureTable::new();
        let m = RtlEmitter::new(&host);
        let w: Expression = Identifier::register("W", DataType::Byte, 0xFE8).into();
        let e = m.fn_call("__swapf", DataType::Byte, vec![w.clone()]).unwrap();
        assert_eq!(e.to_string(), "__swapf(W)");
        assert!(m.fn_call("__swapf", DataType::Byte, vec![w.clone(), w]).is_err());
    }

    #[test]
    fn test_add_imm_negative() {
        let host = PseudoProcedureTable::new();
        let m = RtlEmitter::new(&host);
        let fsr: Expression = Identifier::register("FSR0", DataType::Word16, 0xFE9).into();
        assert_eq!(m.add_imm(fsr.clone(), -1).to_string(), "FSR0 - 0x0001");
        assert_eq!(m.add_imm(fsr, 2).to_string(), "FSR0 + 0x0002");
    }
}
