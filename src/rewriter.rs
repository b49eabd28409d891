//! The architecture-independent rewriting engine.
//!
//! [`RewriterStream`] pulls machine instructions from an
//! [`InstructionStream`] and hands each one, together with lookahead access
//! and a fresh [`RtlEmitter`], to an [`InstructionRewriter`]. Each call
//! produces one [`InstructionCluster`]. The first failure is yielded once and
//! ends the stream.

use crate::emitter::RtlEmitter;
use crate::ir::{Expression, Identifier, InstructionCluster};
use crate::pseudo::RewriterHost;
use crate::stream::{InstructionStream, Lookahead};
use crate::{Architecture, Decoder, LiftError, MachineInstruction};

/// Per-architecture lowering of machine instructions to RTL.
pub trait InstructionRewriter: Send + Sync {
    type Instr: MachineInstruction;

    fn architecture(&self) -> Architecture;

    /// Emit the RTL for `instr` into `m`. Instructions taken from
    /// `lookahead` become part of the same cluster.
    fn rewrite(
        &self,
        instr: &Self::Instr,
        lookahead: &mut dyn Lookahead<Self::Instr>,
        m: &mut RtlEmitter<'_>,
    ) -> Result<(), LiftError>;
}

/// Options for [`emit_copy`]. All three are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyFlags {
    /// Compute into a temporary before storing to a non-register destination.
    pub force_split: bool,
    /// Follow the copy with a condition-code update from the stored value.
    pub emit_cc: bool,
    /// Set the carry flag exactly when the stored value is zero.
    pub set_carry_if_zero: bool,
}

impl CopyFlags {
    pub const NONE: CopyFlags = CopyFlags {
        force_split: false,
        emit_cc: false,
        set_carry_if_zero: false,
    };

    pub const SPLIT: CopyFlags = CopyFlags {
        force_split: true,
        emit_cc: false,
        set_carry_if_zero: false,
    };

    pub const SPLIT_CC: CopyFlags = CopyFlags {
        force_split: true,
        emit_cc: true,
        set_carry_if_zero: false,
    };

    pub fn with_carry_if_zero(mut self) -> Self {
        self.set_carry_if_zero = true;
        self
    }
}

/// Flag registers a rewriter exposes to [`emit_copy`].
pub trait FlagModel {
    /// Group updated by the instruction currently being rewritten.
    fn cc_group(&self) -> Identifier;

    fn carry(&self) -> Identifier;
}

/// Assign `src` to `dst` as directed by `flags`. Returns the expression
/// holding the stored value: `dst` itself, or the temporary it was
/// computed into.
pub fn emit_copy(
    m: &mut RtlEmitter<'_>,
    flag_model: &dyn FlagModel,
    dst: Expression,
    src: Expression,
    flags: CopyFlags,
) -> Expression {
    let value = if dst.is_identifier() || !flags.force_split {
        m.assign(dst.clone(), src);
        dst
    } else {
        let tmp = m.temporary(src.data_type());
        m.assign(tmp.clone(), src);
        m.assign(dst, tmp.clone());
        Expression::Id(tmp)
    };
    if flags.emit_cc {
        let cond = m.cond(value.clone());
        m.assign(flag_model.cc_group(), cond);
    }
    if flags.set_carry_if_zero {
        let zero = m.eq0(value.clone());
        m.assign(flag_model.carry(), zero);
    }
    value
}

/// Lookahead adapter that tracks how many bytes the rewriter consumed.
struct ClusterLookahead<'s, 'a, D: Decoder> {
    stream: &'s mut InstructionStream<'a, D>,
    consumed: u32,
}

impl<D: Decoder> Lookahead<D::Instr> for ClusterLookahead<'_, '_, D> {
    fn peek(&mut self) -> Option<&D::Instr> {
        self.stream.peek_instruction()
    }

    fn consume(&mut self) -> Option<D::Instr> {
        let instr = self.stream.consume_instruction()?;
        self.consumed += instr.length();
        Some(instr)
    }
}

/// Lazy sequence of clusters for one architecture.
pub struct RewriterStream<'a, D, R>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    instructions: InstructionStream<'a, D>,
    rewriter: &'a R,
    host: &'a dyn RewriterHost,
    failed: bool,
}

impl<'a, D, R> RewriterStream<'a, D, R>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    pub fn new(instructions: InstructionStream<'a, D>, rewriter: &'a R, host: &'a dyn RewriterHost) -> Self {
        Self {
            instructions,
            rewriter,
            host,
            failed: false,
        }
    }

    fn rewrite_one(&mut self, instr: D::Instr) -> Result<InstructionCluster, LiftError> {
        let mut m = RtlEmitter::new(self.host);
        let mut lookahead = ClusterLookahead {
            stream: &mut self.instructions,
            consumed: 0,
        };
        self.rewriter.rewrite(&instr, &mut lookahead, &mut m)?;
        let length = instr.length() + lookahead.consumed;
        let (class, instructions) = m.finish();
        Ok(InstructionCluster::new(instr.address(), length, class, instructions))
    }
}

impl<D, R> Iterator for RewriterStream<'_, D, R>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    type Item = Result<InstructionCluster, LiftError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.instructions.next()? {
            Ok(instr) => self.rewrite_one(instr),
            Err(e) => Err(LiftError::Decode(e)),
        };
        if let Err(e) = &result {
            log::debug!("rewriting stopped: {}", e);
            self.failed = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, DataType, RtlClass, RtlInstruction};
    use crate::pseudo::PseudoProcedureTable;

    struct Flags;

    impl FlagModel for Flags {
        fn cc_group(&self) -> Identifier {
            Identifier::flag_group("SZ", "F", 3)
        }
        fn carry(&self) -> Identifier {
            Identifier::flag_group("C", "F", 4)
        }
    }

    fn mem_dst() -> Expression {
        Expression::Mem {
            segment: None,
            ea: Box::new(Constant::new(0x40, DataType::Ptr16).into()),
            data_type: DataType::Byte,
        }
    }

    fn rendered(instrs: &[RtlInstruction]) -> Vec<String> {
        instrs.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_copy_to_register_is_direct() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        let r: Expression = Identifier::register("r", DataType::Byte, 1).into();
        let src = m.byte(7);
        let value = emit_copy(&mut m, &Flags, r.clone(), src, CopyFlags::SPLIT_CC);
        assert_eq!(value, r);
        let (_, instrs) = m.finish();
        assert_eq!(rendered(&instrs), vec!["r = 0x07", "SZ = cond(r)"]);
    }

    #[test]
    fn test_copy_to_memory_splits() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        let src = m.byte(7);
        emit_copy(
            &mut m,
            &Flags,
            mem_dst(),
            src,
            CopyFlags::SPLIT_CC.with_carry_if_zero(),
        );
        let (_, instrs) = m.finish();
        assert_eq!(
            rendered(&instrs),
            vec![
                "v0 = 0x07",
                "Mem[0x0040:byte] = v0",
                "SZ = cond(v0)",
                "C = v0 == 0x00",
            ]
        );
    }

    #[test]
    fn test_copy_without_split_stores_directly() {
        let host = PseudoProcedureTable::new();
        let mut m = RtlEmitter::new(&host);
        let src = m.byte(1);
        emit_copy(&mut m, &Flags, mem_dst(), src, CopyFlags::NONE);
        let (class, instrs) = m.finish();
        assert_eq!(class, RtlClass::Linear);
        assert_eq!(rendered(&instrs), vec!["Mem[0x0040:byte] = 0x01"]);
    }
}
