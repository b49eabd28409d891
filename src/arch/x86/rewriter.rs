//! Lowering of x86 instructions to RTL.
//!
//! Each opcode family maps to one method on [`Lowering`], which holds the
//! instruction being rewritten and the cluster's emitter. Opcodes with no
//! lowering fail with [`LiftError::UnsupportedOpcode`].

use super::instruction::{RepPrefix, X86Instruction};
use super::opcodes::{used_flags, Opcode};
use super::operands::{MemoryOperand, Operand};
use super::registers::{flag_group, flags, fpu_flags, Register};
use super::X86Mode;
use crate::emitter::RtlEmitter;
use crate::ir::{BinaryOp, ConditionCode, Constant, DataType, Expression, Identifier, RtlClass, UnaryOp};
use crate::pseudo::names;
use crate::rewriter::{emit_copy, CopyFlags, FlagModel, InstructionRewriter};
use crate::stream::Lookahead;
use crate::{Address, Architecture, LiftError};

/// Rewriter for one x86 processor mode.
#[derive(Debug, Clone, Copy)]
pub struct X86Rewriter {
    mode: X86Mode,
}

impl X86Rewriter {
    pub fn new(mode: X86Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> X86Mode {
        self.mode
    }
}

impl InstructionRewriter for X86Rewriter {
    type Instr = X86Instruction;

    fn architecture(&self) -> Architecture {
        self.mode.architecture()
    }

    fn rewrite(
        &self,
        instr: &X86Instruction,
        lookahead: &mut dyn Lookahead<X86Instruction>,
        m: &mut RtlEmitter<'_>,
    ) -> Result<(), LiftError> {
        Lowering {
            mode: self.mode,
            instr,
            m,
        }
        .rewrite(lookahead)
    }
}

/// Flags defined by the opcode being rewritten.
struct DefinedFlags(u32);

impl FlagModel for DefinedFlags {
    fn cc_group(&self) -> Identifier {
        flag_group(self.0)
    }

    fn carry(&self) -> Identifier {
        flag_group(flags::CF)
    }
}

struct Lowering<'a, 'e, 'h> {
    mode: X86Mode,
    instr: &'a X86Instruction,
    m: &'e mut RtlEmitter<'h>,
}

impl<'a> Lowering<'a, '_, '_> {
    fn rewrite(&mut self, lookahead: &mut dyn Lookahead<X86Instruction>) -> Result<(), LiftError> {
        use Opcode::*;
        let instr = self.instr;
        if instr.rep != RepPrefix::None && instr.opcode.is_string_instruction() {
            return self.rep(instr, instr.rep, instr.next_address());
        }
        match instr.opcode {
            Add => self.binop(BinaryOp::IAdd),
            Sub => self.binop(BinaryOp::ISub),
            Adc => self.binop_with_carry(BinaryOp::IAdd),
            Sbb => self.binop_with_carry(BinaryOp::ISub),
            And => self.logical(BinaryOp::And),
            Or => self.logical(BinaryOp::Or),
            Xor => self.logical(BinaryOp::Xor),
            Cmp => self.cmp(),
            Test => self.test(),
            Inc => self.inc_dec(1),
            Dec => self.inc_dec(-1),
            Neg => self.neg(),
            Not => self.unary(UnaryOp::Comp, CopyFlags::SPLIT),
            Mov => self.mov(),
            Movzx => self.extend(false),
            Movsx | Movsxd => self.extend(true),
            Lea => self.lea(),
            Xchg => self.xchg(),
            Push => self.push(),
            Pop => self.pop(),
            Pushf => self.pushf(),
            Popf => self.popf(),
            Call => self.call(),
            Jmp => self.jmp(),
            Ret => self.ret(),
            Ja | Jae | Jb | Jbe | Je | Jne | Jg | Jge | Jl | Jle | Jo | Jno | Js | Jns | Jp
            | Jnp => self.jcc(),
            Jcxz => self.jump_if_count_zero(Register::CX),
            Jecxz => self.jump_if_count_zero(Register::ECX),
            Jrcxz => self.jump_if_count_zero(Register::RCX),
            Loop | Loope | Loopne => self.lp(),
            Seta | Setae | Setb | Setbe | Sete | Setne | Setg | Setge | Setl | Setle | Seto
            | Setno | Sets | Setns | Setp | Setnp => self.setcc(),
            Cmova | Cmovae | Cmovb | Cmovbe | Cmove | Cmovne | Cmovg | Cmovge | Cmovl
            | Cmovle | Cmovo | Cmovno | Cmovs | Cmovns | Cmovp | Cmovnp => self.cmov(),
            Clc => self.set_flag(flags::CF, false),
            Stc => self.set_flag(flags::CF, true),
            Cld => self.set_flag(flags::DF, false),
            Std => self.set_flag(flags::DF, true),
            Cmc => self.cmc(),
            Cli => self.intrinsic(names::CLI),
            Sti => self.intrinsic(names::STI),
            Hlt => self.hlt(),
            Int => self.int(),
            In => self.port_in(),
            Out => self.port_out(),
            Cbw => self.widen(Register::AL, Register::AX),
            Cwde => self.widen(Register::AX, Register::EAX),
            Cdqe => self.widen(Register::EAX, Register::RAX),
            Cwd => self.widen_pair(Register::AX, Register::DX),
            Cdq => self.widen_pair(Register::EAX, Register::EDX),
            Cqo => self.widen_pair(Register::RAX, Register::RDX),
            Mul => self.widening_mul(false),
            Imul => self.imul(),
            Div => self.div(false),
            Idiv => self.div(true),
            Shl => self.shift(BinaryOp::Shl),
            Shr => self.shift(BinaryOp::Shr),
            Sar => self.shift(BinaryOp::Sar),
            Rol => self.rotate(names::ROL, false),
            Ror => self.rotate(names::ROR, false),
            Rcl => self.rotate(names::RCL, true),
            Rcr => self.rotate(names::RCR, true),
            Shld => self.double_shift(names::SHLD),
            Shrd => self.double_shift(names::SHRD),
            Bt => self.bt(),
            Bsr => self.bsr(),
            Bswap => self.bswap(),
            Daa => self.decimal_adjust(names::DAA),
            Das => self.decimal_adjust(names::DAS),
            Aaa => self.aaa(),
            Aam => self.aam(),
            Lahf => self.lahf(),
            Sahf => self.sahf(),
            Leave => self.leave(),
            Enter => self.enter(),
            Pusha => self.pusha(),
            Popa => self.popa(),
            Iret => self.iret(),
            Lds => self.load_far_pointer(Register::DS),
            Les => self.load_far_pointer(Register::ES),
            Lfs => self.load_far_pointer(Register::FS),
            Lgs => self.load_far_pointer(Register::GS),
            Lss => self.load_far_pointer(Register::SS),
            Arpl => self.arpl(),
            Xlat => self.xlat(),
            Movs | Movsb | Stos | Stosb | Lods | Lodsb | Cmps | Cmpsb | Scas | Scasb | Ins
            | Outs => {
                self.string(instr)
            }
            Rep => self.rep_prefix(RepPrefix::Rep, lookahead),
            Repne => self.rep_prefix(RepPrefix::Repne, lookahead),
            Fld1 => self.fpu_load_constant(1.0),
            Fldz => self.fpu_load_constant(0.0),
            Fldpi => self.fpu_load_constant(std::f64::consts::PI),
            Fchs => self.fchs(),
            Fsin => self.fpu_unary(names::SIN),
            Fcos => self.fpu_unary(names::COS),
            Fsqrt => self.fpu_unary(names::SQRT),
            Fpatan => self.fpatan(),
            Fld => self.fld(false),
            Fild => self.fld(true),
            Fst => self.fpu_store(false, false),
            Fstp => self.fpu_store(false, true),
            Fist => self.fpu_store(true, false),
            Fistp => self.fpu_store(true, true),
            Fadd => self.fpu_arith(BinaryOp::FAdd, false, false),
            Faddp => self.fpu_arith(BinaryOp::FAdd, false, true),
            Fsub => self.fpu_arith(BinaryOp::FSub, false, false),
            Fsubp => self.fpu_arith(BinaryOp::FSub, false, true),
            Fsubr => self.fpu_arith(BinaryOp::FSub, true, false),
            Fsubrp => self.fpu_arith(BinaryOp::FSub, true, true),
            Fmul => self.fpu_arith(BinaryOp::FMul, false, false),
            Fmulp => self.fpu_arith(BinaryOp::FMul, false, true),
            Fdiv => self.fpu_arith(BinaryOp::FDiv, false, false),
            Fdivp => self.fpu_arith(BinaryOp::FDiv, false, true),
            Fdivr => self.fpu_arith(BinaryOp::FDiv, true, false),
            Fdivrp => self.fpu_arith(BinaryOp::FDiv, true, true),
            Fiadd => self.fpu_int_arith(BinaryOp::FAdd, false),
            Fisub => self.fpu_int_arith(BinaryOp::FSub, false),
            Fisubr => self.fpu_int_arith(BinaryOp::FSub, true),
            Fimul => self.fpu_int_arith(BinaryOp::FMul, false),
            Fidiv => self.fpu_int_arith(BinaryOp::FDiv, false),
            Fidivr => self.fpu_int_arith(BinaryOp::FDiv, true),
            Fcom => self.fcom(false, 0),
            Fcomp => self.fcom(false, 1),
            Fcompp => self.fcom(false, 2),
            Ficom => self.fcom(true, 0),
            Ficomp => self.fcom(true, 1),
            Ftst => self.ftst(),
            Fxam => self.fxam(),
            Fxch => self.fxch(),
            Fclex => self.intrinsic(names::FCLEX),
            Fldcw => self.fldcw(),
            Fstcw => self.fpu_save(Register::FPUCW),
            Fstsw => self.fpu_save(Register::FPUSW),
            Frndint => self.fpu_unary(names::RNDINT),
            Fsincos => self.fsincos(),
            Fyl2x => self.fyl2x(),
            Nop | Wait => {
                self.m.nop();
                Ok(())
            }
            Illegal => {
                self.m.invalid();
                Ok(())
            }
            Cpuid | Rdtsc | Unrecognized => Err(LiftError::UnsupportedOpcode {
                address: instr.address,
                architecture: self.mode.architecture(),
                opcode: instr.mnemonic.clone(),
            }),
        }
    }

    // ---- operand access ----

    fn operand(&self, i: usize) -> Result<&'a Operand, LiftError> {
        let instr = self.instr;
        instr
            .operands
            .get(i)
            .ok_or_else(|| LiftError::MalformedInstruction {
                address: instr.address,
                reason: format!("{} needs operand {}", instr.mnemonic, i + 1),
            })
    }

    fn reg(&self, r: Register) -> Expression {
        r.identifier().into()
    }

    fn sized(&self, r: Register, bits: u32) -> Register {
        r.with_width(bits).unwrap_or(r)
    }

    fn flags(&self, mask: u32) -> Expression {
        flag_group(mask).into()
    }

    fn effective_address(&self, mem: &MemoryOperand) -> Expression {
        let aw = self.instr.address_width;
        if mem.is_ip_relative() {
            let target = (self.instr.next_address() as i64).wrapping_add(mem.displacement);
            return self.m.word(target as u64, aw);
        }
        let mut ea = mem.base.map(|b| self.reg(b));
        if let Some(index) = mem.index {
            let mut scaled = self.reg(index);
            if mem.scale > 1 {
                let k = self.m.word(mem.scale as u64, index.data_type());
                scaled = self.m.imul(scaled, k);
            }
            ea = Some(match ea {
                Some(base) => self.m.iadd(base, scaled),
                None => scaled,
            });
        }
        match ea {
            Some(e) if mem.displacement != 0 => self.m.add_imm(e, mem.displacement),
            Some(e) => e,
            None => self.m.word(mem.displacement as u64, aw),
        }
    }

    fn memory(&self, mem: &MemoryOperand) -> Expression {
        let ea = self.effective_address(mem);
        match mem.segment_in(self.mode) {
            Some(seg) => self.m.seg_mem(mem.width, self.reg(seg), ea),
            None => self.m.mem(mem.width, ea),
        }
    }

    /// Operand value, with immediates sized to `width`.
    fn read(&self, op: &Operand, width: DataType) -> Expression {
        match op {
            Operand::Register(r) => self.reg(*r),
            Operand::Immediate { value, .. } => self.m.word(*value as u64, width),
            Operand::Memory(mem) => self.memory(mem),
            Operand::Address(a) => Expression::CodeAddress(*a),
        }
    }

    fn code_target(&self, i: usize) -> Result<Address, LiftError> {
        match self.operand(i)? {
            Operand::Address(a) => Ok(*a),
            Operand::Immediate { value, .. } => Ok(*value as Address),
            other => Err(LiftError::MalformedInstruction {
                address: self.instr.address,
                reason: format!("expected a code address, found {}", other),
            }),
        }
    }

    fn immediate(&self, i: usize) -> Result<i64, LiftError> {
        match self.operand(i)? {
            Operand::Immediate { value, .. } => Ok(*value),
            other => Err(LiftError::MalformedInstruction {
                address: self.instr.address,
                reason: format!("expected an immediate, found {}", other),
            }),
        }
    }

    fn copy(&mut self, dst: Expression, src: Expression, flags: CopyFlags) -> Expression {
        let model = DefinedFlags(self.instr.opcode.defined_flags());
        emit_copy(self.m, &model, dst, src, flags)
    }

    fn stack_slot(&self, width: DataType, sp: Expression) -> Expression {
        if self.mode.is_segmented() {
            self.m.seg_mem(width, self.reg(Register::SS), sp)
        } else {
            self.m.mem(width, sp)
        }
    }

    fn adjust(&mut self, r: Register, delta: i64) {
        let e = self.reg(r);
        let v = self.m.add_imm(e.clone(), delta);
        self.m.assign(e, v);
    }

    fn push_value(&mut self, value: Expression, width: DataType) {
        let sp = self.mode.stack_pointer();
        self.adjust(sp, -(width.byte_size() as i64));
        let slot = self.stack_slot(width, self.reg(sp));
        self.m.assign(slot, value);
    }

    fn pop_into(&mut self, dst: Expression, width: DataType) {
        let sp = self.mode.stack_pointer();
        let slot = self.stack_slot(width, self.reg(sp));
        self.m.assign(dst, slot);
        self.adjust(sp, width.byte_size() as i64);
    }

    fn condition(&self) -> Result<ConditionCode, LiftError> {
        self.instr
            .opcode
            .condition()
            .ok_or_else(|| LiftError::MalformedInstruction {
                address: self.instr.address,
                reason: format!("{} has no condition code", self.instr.mnemonic),
            })
    }

    fn test_cc(&self, cc: ConditionCode) -> Expression {
        self.m.test(cc, flag_group(used_flags(cc)))
    }

    // ---- arithmetic and logic ----

    fn binop(&mut self, op: BinaryOp) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let src = self.read(self.operand(1)?, width);
        let value = self.m.binary(op, width, dst.clone(), src);
        self.copy(dst, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn binop_with_carry(&mut self, op: BinaryOp) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let src = self.read(self.operand(1)?, width);
        let partial = self.m.binary(op, width, dst.clone(), src);
        let value = self.m.binary(op, width, partial, self.flags(flags::CF));
        self.copy(dst, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn logical(&mut self, op: BinaryOp) -> Result<(), LiftError> {
        self.binop(op)?;
        self.set_flag(flags::CF, false)
    }

    fn cmp(&mut self) -> Result<(), LiftError> {
        let a_op = self.operand(0)?;
        let width = a_op.width();
        let a = self.read(a_op, width);
        let b = self.read(self.operand(1)?, width);
        let diff = self.m.isub(a, b);
        let cc = self.m.cond(diff);
        self.m.assign(flag_group(flags::SCZO), cc);
        Ok(())
    }

    fn test(&mut self) -> Result<(), LiftError> {
        let a_op = self.operand(0)?;
        let width = a_op.width();
        let a = self.read(a_op, width);
        let b = self.read(self.operand(1)?, width);
        let both = self.m.and(a, b);
        let cc = self.m.cond(both);
        self.m.assign(flag_group(flags::SZO), cc);
        self.set_flag(flags::CF, false)
    }

    fn inc_dec(&mut self, delta: i64) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let dst = self.read(dst_op, dst_op.width());
        let value = self.m.add_imm(dst.clone(), delta);
        self.copy(dst, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, flags: CopyFlags) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let dst = self.read(dst_op, dst_op.width());
        let value = self.m.unary(op, dst.clone());
        self.copy(dst, value, flags);
        Ok(())
    }

    /// Carry is set unless the operand was zero.
    fn neg(&mut self) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let dst = self.read(dst_op, dst_op.width());
        let value = self.m.neg(dst.clone());
        let result = self.copy(dst, value, CopyFlags::SPLIT_CC);
        let carry = self.m.ne0(result);
        self.m.assign(flag_group(flags::CF), carry);
        Ok(())
    }

    fn arpl(&mut self) -> Result<(), LiftError> {
        let dst = self.read(self.operand(0)?, DataType::Word16);
        let src = self.read(self.operand(1)?, DataType::Word16);
        let value = self.m.fn_call(names::ARPL, DataType::Word16, vec![dst.clone(), src])?;
        self.copy(dst, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn mov(&mut self) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let src = self.read(self.operand(1)?, width);
        let dst = self.read(dst_op, width);
        self.copy(dst, src, CopyFlags::NONE);
        Ok(())
    }

    fn extend(&mut self, signed: bool) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let src_op = self.operand(1)?;
        let bits = dst_op.width().bit_size();
        let dst = self.read(dst_op, dst_op.width());
        let src = self.read(src_op, src_op.width());
        let dt = if signed { DataType::int(bits) } else { DataType::uint(bits) };
        let value = self.m.cast(dt, src);
        self.m.assign(dst, value);
        Ok(())
    }

    fn lea(&mut self) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let Operand::Memory(mem) = self.operand(1)? else {
            return Err(LiftError::MalformedInstruction {
                address: self.instr.address,
                reason: "lea needs a memory operand".to_string(),
            });
        };
        let dst = self.read(dst_op, dst_op.width());
        let ea = self.effective_address(mem);
        self.m.assign(dst, ea);
        Ok(())
    }

    /// `lds`-style loads of a far pointer: offset into the register, selector
    /// into `segment`. The offset goes through a temporary so a register used
    /// in the address is read before it is overwritten.
    fn load_far_pointer(&mut self, segment: Register) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let Operand::Memory(mem) = self.operand(1)? else {
            return Err(LiftError::MalformedInstruction {
                address: self.instr.address,
                reason: format!("{} needs a memory operand", self.instr.mnemonic),
            });
        };
        let width = dst_op.width();
        let offset = self.memory(&MemoryOperand { width, ..mem.clone() });
        let selector = self.memory(&MemoryOperand {
            width: DataType::Word16,
            displacement: mem.displacement + width.byte_size() as i64,
            ..mem.clone()
        });
        let tmp = self.m.temporary(width);
        self.m.assign(tmp.clone(), offset);
        self.m.assign(self.reg(segment), selector);
        let dst = self.read(dst_op, width);
        self.m.assign(dst, tmp);
        Ok(())
    }

    fn xchg(&mut self) -> Result<(), LiftError> {
        let a_op = self.operand(0)?;
        let b_op = self.operand(1)?;
        if a_op == b_op {
            self.m.nop();
            return Ok(());
        }
        let width = a_op.width();
        let a = self.read(a_op, width);
        let b = self.read(b_op, width);
        let tmp = self.m.temporary(width);
        self.m.assign(tmp.clone(), a.clone());
        self.m.assign(a, b.clone());
        self.m.assign(b, tmp);
        Ok(())
    }

    fn widen(&mut self, from: Register, to: Register) -> Result<(), LiftError> {
        let value = self.m.cast(DataType::int(to.bit_size()), self.reg(from));
        self.m.assign(self.reg(to), value);
        Ok(())
    }

    fn widen_pair(&mut self, lo: Register, hi: Register) -> Result<(), LiftError> {
        let dt = DataType::int(lo.bit_size() * 2);
        let value = self.m.cast(dt, self.reg(lo));
        let dst = self.m.seq(dt, self.reg(hi), self.reg(lo));
        self.m.assign(dst, value);
        Ok(())
    }

    /// Accumulator registers for a `bits`-wide multiply or divide:
    /// (low half, high half, combined double-width value).
    fn accumulator(&self, bits: u32, dt: DataType) -> (Register, Register, Expression) {
        if bits == 8 {
            (Register::AL, Register::AH, self.reg(Register::AX))
        } else {
            let lo = self.sized(Register::EAX, bits);
            let hi = self.sized(Register::EDX, bits);
            (lo, hi, self.m.seq(dt, self.reg(hi), self.reg(lo)))
        }
    }

    fn widening_mul(&mut self, signed: bool) -> Result<(), LiftError> {
        let src_op = self.operand(0)?;
        let width = src_op.width();
        let bits = width.bit_size();
        let dt = if signed { DataType::int(bits * 2) } else { DataType::uint(bits * 2) };
        let (lo, _, dst) = self.accumulator(bits, dt);
        let src = self.read(src_op, width);
        let product = if signed {
            self.m.smul(dt, self.reg(lo), src)
        } else {
            self.m.umul(dt, self.reg(lo), src)
        };
        self.m.assign(dst.clone(), product);
        let cc = self.m.cond(dst);
        self.m.assign(flag_group(flags::SCZO), cc);
        Ok(())
    }

    fn imul(&mut self) -> Result<(), LiftError> {
        let (dst_op, a_op, b_op) = match self.instr.operands.len() {
            1 => return self.widening_mul(true),
            2 => (self.operand(0)?, self.operand(0)?, self.operand(1)?),
            _ => (self.operand(0)?, self.operand(1)?, self.operand(2)?),
        };
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let a = self.read(a_op, width);
        let b = self.read(b_op, width);
        let product = self.m.smul(DataType::int(width.bit_size()), a, b);
        self.copy(dst, product, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn div(&mut self, signed: bool) -> Result<(), LiftError> {
        let divisor_op = self.operand(0)?;
        let width = divisor_op.width();
        let bits = width.bit_size();
        let dt = if signed { DataType::int(bits * 2) } else { DataType::uint(bits * 2) };
        let (lo, hi, dividend) = self.accumulator(bits, dt);
        let divisor = self.read(divisor_op, width);
        let tmp = self.m.temporary(dt);
        self.m.assign(tmp.clone(), dividend);
        let part = if signed { DataType::int(bits) } else { DataType::uint(bits) };
        let (rem, quo) = if signed {
            (
                self.m.smod(part, tmp.clone().into(), divisor.clone()),
                self.m.sdiv(part, tmp.into(), divisor),
            )
        } else {
            (
                self.m.umod(part, tmp.clone().into(), divisor.clone()),
                self.m.udiv(part, tmp.into(), divisor),
            )
        };
        self.m.assign(self.reg(hi), rem);
        self.m.assign(self.reg(lo), quo);
        Ok(())
    }

    fn shift(&mut self, op: BinaryOp) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let count = match self.instr.op(1) {
            Some(op) => self.read(op, DataType::Byte),
            None => self.m.byte(1),
        };
        let value = self.m.binary(op, width, dst.clone(), count);
        self.copy(dst, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn rotate(&mut self, name: &str, through_carry: bool) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let count = match self.instr.op(1) {
            Some(op) => self.read(op, DataType::Byte),
            None => self.m.byte(1),
        };
        let mut args = vec![dst.clone(), count];
        if through_carry {
            args.push(self.flags(flags::CF));
        }
        let value = self.m.fn_call(name, width, args)?;
        self.copy(dst, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn double_shift(&mut self, name: &str) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let src = self.read(self.operand(1)?, width);
        let count = self.read(self.operand(2)?, DataType::Byte);
        let value = self.m.fn_call(name, width, vec![dst.clone(), src, count])?;
        self.copy(dst, value, CopyFlags::SPLIT);
        Ok(())
    }

    fn bt(&mut self) -> Result<(), LiftError> {
        let base_op = self.operand(0)?;
        let width = base_op.width();
        let base = self.read(base_op, width);
        let bit = self.read(self.operand(1)?, width);
        let value = self.m.fn_call(names::BT, DataType::Bool, vec![base, bit])?;
        self.m.assign(flag_group(flags::CF), value);
        Ok(())
    }

    fn bsr(&mut self) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let src = self.read(self.operand(1)?, width);
        let zero = self.m.eq0(src.clone());
        self.m.assign(flag_group(flags::ZF), zero);
        let value = self.m.fn_call(names::BSR, width, vec![src])?;
        self.m.assign(dst, value);
        Ok(())
    }

    fn bswap(&mut self) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let value = self.m.fn_call(names::BSWAP, width, vec![dst.clone()])?;
        self.copy(dst, value, CopyFlags::NONE);
        Ok(())
    }

    fn decimal_adjust(&mut self, name: &str) -> Result<(), LiftError> {
        let al = self.reg(Register::AL);
        let value = self.m.fn_call(name, DataType::Byte, vec![al.clone()])?;
        self.copy(al, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn aaa(&mut self) -> Result<(), LiftError> {
        let ax = self.reg(Register::AX);
        let value = self.m.fn_call(names::AAA, DataType::Word16, vec![ax.clone()])?;
        self.copy(ax, value, CopyFlags::SPLIT_CC);
        Ok(())
    }

    fn aam(&mut self) -> Result<(), LiftError> {
        let base = match self.instr.op(0) {
            Some(op) => self.read(op, DataType::Byte),
            None => self.m.byte(10),
        };
        let value = self
            .m
            .fn_call(names::AAM, DataType::Word16, vec![self.reg(Register::AL), base])?;
        self.m.assign(self.reg(Register::AX), value);
        Ok(())
    }

    // ---- flags ----

    fn set_flag(&mut self, mask: u32, value: bool) -> Result<(), LiftError> {
        let v = self.m.bool(value);
        self.m.assign(flag_group(mask), v);
        Ok(())
    }

    fn cmc(&mut self) -> Result<(), LiftError> {
        let c = self.flags(flags::CF);
        let v = self.m.not(c.clone());
        self.m.assign(c, v);
        Ok(())
    }

    fn lahf(&mut self) -> Result<(), LiftError> {
        let group = self.flags(flags::SF | flags::ZF | flags::AF | flags::PF | flags::CF);
        self.m.assign(self.reg(Register::AH), group);
        Ok(())
    }

    fn sahf(&mut self) -> Result<(), LiftError> {
        let group = flag_group(flags::SF | flags::ZF | flags::AF | flags::PF | flags::CF);
        self.m.assign(group, self.reg(Register::AH));
        Ok(())
    }

    fn pushf(&mut self) -> Result<(), LiftError> {
        let word = self.mode.word();
        self.push_value(self.flags(flags::ALL), word);
        Ok(())
    }

    fn popf(&mut self) -> Result<(), LiftError> {
        let word = self.mode.word();
        self.pop_into(self.flags(flags::ALL), word);
        Ok(())
    }

    // ---- stack ----

    fn push(&mut self) -> Result<(), LiftError> {
        let op = self.operand(0)?;
        let width = match op {
            Operand::Immediate { .. } => self.mode.word(),
            other => other.width(),
        };
        let value = self.read(op, width);
        self.push_value(value, width);
        Ok(())
    }

    fn pop(&mut self) -> Result<(), LiftError> {
        let op = self.operand(0)?;
        let width = op.width();
        let dst = self.read(op, width);
        self.pop_into(dst, width);
        Ok(())
    }

    fn leave(&mut self) -> Result<(), LiftError> {
        let sp = self.mode.stack_pointer();
        let bp = self.mode.frame_pointer();
        self.m.assign(self.reg(sp), self.reg(bp));
        self.pop_into(self.reg(bp), bp.data_type());
        Ok(())
    }

    /// `enter size, level`: push the frame pointer, copy `level - 1` outer
    /// frame pointers, then reserve `size` bytes.
    fn enter(&mut self) -> Result<(), LiftError> {
        let size = self.immediate(0)?;
        let level = match self.instr.op(1) {
            Some(_) => self.immediate(1)? & 0x1F,
            None => 0,
        };
        let sp = self.mode.stack_pointer();
        let bp = self.mode.frame_pointer();
        let word = bp.data_type();
        self.push_value(self.reg(bp), word);
        let frame = self.m.temporary(word);
        self.m.assign(frame.clone(), self.reg(sp));
        for _ in 1..level {
            self.adjust(bp, -(word.byte_size() as i64));
            let outer = self.stack_slot(word, self.reg(bp));
            self.push_value(outer, word);
        }
        if level > 0 {
            self.push_value(frame.clone().into(), word);
        }
        self.m.assign(self.reg(bp), frame);
        if size != 0 {
            self.adjust(sp, -size);
        }
        Ok(())
    }

    const GENERAL: [Register; 8] = [
        Register::EAX,
        Register::ECX,
        Register::EDX,
        Register::EBX,
        Register::ESP,
        Register::EBP,
        Register::ESI,
        Register::EDI,
    ];

    /// Pushes the general registers; the stack pointer is pushed as it was
    /// before the first push.
    fn pusha(&mut self) -> Result<(), LiftError> {
        let width = self.instr.data_width;
        let bits = width.bit_size();
        let sp = self.sized(Register::ESP, bits);
        let saved = self.m.temporary(width);
        self.m.assign(saved.clone(), self.reg(sp));
        for r in Self::GENERAL {
            let value = if r == Register::ESP {
                saved.clone().into()
            } else {
                self.reg(self.sized(r, bits))
            };
            self.push_value(value, width);
        }
        Ok(())
    }

    /// Pops the general registers in reverse; the saved stack pointer is skipped.
    fn popa(&mut self) -> Result<(), LiftError> {
        let width = self.instr.data_width;
        let bits = width.bit_size();
        for r in Self::GENERAL.into_iter().rev() {
            if r == Register::ESP {
                self.adjust(self.mode.stack_pointer(), width.byte_size() as i64);
            } else {
                self.pop_into(self.reg(self.sized(r, bits)), width);
            }
        }
        Ok(())
    }

    // ---- control flow ----

    fn call(&mut self) -> Result<(), LiftError> {
        let target = self.read(self.operand(0)?, self.mode.word());
        self.m.call(target, self.mode.pointer_size());
        Ok(())
    }

    fn jmp(&mut self) -> Result<(), LiftError> {
        let target = self.read(self.operand(0)?, self.mode.word());
        self.m.goto(target);
        Ok(())
    }

    fn ret(&mut self) -> Result<(), LiftError> {
        let extra = match self.instr.op(0) {
            Some(Operand::Immediate { value, .. }) => *value as u32,
            _ => 0,
        };
        self.m.ret(self.mode.pointer_size(), extra);
        Ok(())
    }

    /// Interrupt return: the flags sit above the far return address.
    fn iret(&mut self) -> Result<(), LiftError> {
        let word = self.mode.word();
        let w = word.byte_size() as i64;
        let above = self.m.add_imm(self.reg(self.mode.stack_pointer()), 2 * w);
        let saved = self.stack_slot(word, above);
        self.m.assign(self.flags(flags::ALL), saved);
        self.m.ret((2 * w) as u8, w as u32);
        Ok(())
    }

    fn jcc(&mut self) -> Result<(), LiftError> {
        let cc = self.condition()?;
        let target = self.code_target(0)?;
        let cond = self.test_cc(cc);
        self.m.branch(cond, target);
        Ok(())
    }

    fn jump_if_count_zero(&mut self, count: Register) -> Result<(), LiftError> {
        let target = self.code_target(0)?;
        let cond = self.m.eq0(self.reg(count));
        self.m.branch(cond, target);
        Ok(())
    }

    fn lp(&mut self) -> Result<(), LiftError> {
        let target = self.code_target(0)?;
        let cx = self.sized(Register::ECX, self.instr.address_width.bit_size());
        self.adjust(cx, -1);
        let mut cond = self.m.ne0(self.reg(cx));
        let zf = match self.instr.opcode {
            Opcode::Loope => Some(ConditionCode::Eq),
            Opcode::Loopne => Some(ConditionCode::Ne),
            _ => None,
        };
        if let Some(cc) = zf {
            let z = self.m.test(cc, flag_group(flags::ZF));
            cond = self.m.cand(cond, z);
        }
        self.m.branch(cond, target);
        Ok(())
    }

    fn setcc(&mut self) -> Result<(), LiftError> {
        let cc = self.condition()?;
        let dst = self.read(self.operand(0)?, DataType::Byte);
        let value = self.test_cc(cc);
        self.m.assign(dst, value);
        Ok(())
    }

    fn cmov(&mut self) -> Result<(), LiftError> {
        let cc = self.condition()?;
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let src = self.read(self.operand(1)?, width);
        let cond = self.test_cc(cc);
        self.m.assign_if(cond, dst, src);
        Ok(())
    }

    // ---- system ----

    fn intrinsic(&mut self, name: &str) -> Result<(), LiftError> {
        let call = self.m.fn_call(name, DataType::Void, Vec::new())?;
        self.m.side_effect(call);
        Ok(())
    }

    fn hlt(&mut self) -> Result<(), LiftError> {
        self.intrinsic(names::HLT)?;
        self.m.set_class(RtlClass::Terminates);
        Ok(())
    }

    fn int(&mut self) -> Result<(), LiftError> {
        let vector = self.read(self.operand(0)?, DataType::Byte);
        let call = self.m.fn_call(names::SYSCALL, DataType::Void, vec![vector])?;
        self.m.side_effect(call);
        Ok(())
    }

    fn port_in(&mut self) -> Result<(), LiftError> {
        let dst_op = self.operand(0)?;
        let width = dst_op.width();
        let dst = self.read(dst_op, width);
        let port = self.read(self.operand(1)?, DataType::Word16);
        let value = self.m.fn_call(names::IN, width, vec![port])?;
        self.m.assign(dst, value);
        Ok(())
    }

    fn port_out(&mut self) -> Result<(), LiftError> {
        let port = self.read(self.operand(0)?, DataType::Word16);
        let src_op = self.operand(1)?;
        let src = self.read(src_op, src_op.width());
        let call = self.m.fn_call(names::OUT, DataType::Void, vec![port, src])?;
        self.m.side_effect(call);
        Ok(())
    }

    fn xlat(&mut self) -> Result<(), LiftError> {
        let aw = self.instr.address_width;
        let bx = self.reg(self.sized(Register::EBX, aw.bit_size()));
        let index = self.m.cast(DataType::uint(aw.bit_size()), self.reg(Register::AL));
        let ea = self.m.iadd(bx, index);
        let mem = if self.mode.is_segmented() {
            self.m.seg_mem(DataType::Byte, self.reg(Register::DS), ea)
        } else {
            self.m.mem(DataType::Byte, ea)
        };
        self.m.assign(self.reg(Register::AL), mem);
        Ok(())
    }

    // ---- string instructions ----

    fn string_operand(&self, width: DataType, index: Register, segment: Register) -> Expression {
        if self.mode.is_segmented() {
            self.m.seg_mem(width, self.reg(segment), self.reg(index))
        } else {
            self.m.mem(width, self.reg(index))
        }
    }

    /// One iteration of a string instruction. The direction flag is assumed clear.
    fn string(&mut self, s: &X86Instruction) -> Result<(), LiftError> {
        use Opcode::*;
        let width = match s.opcode {
            Movsb | Stosb | Lodsb | Cmpsb | Scasb => DataType::Byte,
            Ins | Outs => s
                .operands
                .iter()
                .find_map(|op| match op {
                    Operand::Memory(mem) => Some(mem.width),
                    _ => None,
                })
                .unwrap_or(s.data_width),
            _ => s.data_width,
        };
        let step = width.byte_size() as i64;
        let aw = s.address_width.bit_size();
        let si = self.sized(Register::ESI, aw);
        let di = self.sized(Register::EDI, aw);
        let acc = self.reg(self.sized(Register::EAX, width.bit_size()));
        let src = self.string_operand(width, si, Register::DS);
        let dst = self.string_operand(width, di, Register::ES);
        match s.opcode {
            Movs | Movsb => {
                self.m.assign(dst, src);
                self.adjust(si, step);
                self.adjust(di, step);
            }
            Stos | Stosb => {
                self.m.assign(dst, acc);
                self.adjust(di, step);
            }
            Lods | Lodsb => {
                self.m.assign(acc, src);
                self.adjust(si, step);
            }
            Ins => {
                let value = self.m.fn_call(names::IN, width, vec![self.reg(Register::DX)])?;
                self.m.assign(dst, value);
                self.adjust(di, step);
            }
            Outs => {
                let call = self
                    .m
                    .fn_call(names::OUT, DataType::Void, vec![self.reg(Register::DX), src])?;
                self.m.side_effect(call);
                self.adjust(si, step);
            }
            Cmps | Cmpsb => {
                let diff = self.m.isub(src, dst);
                let cc = self.m.cond(diff);
                self.m.assign(flag_group(flags::SCZO), cc);
                self.adjust(si, step);
                self.adjust(di, step);
            }
            _ => {
                let diff = self.m.isub(acc, dst);
                let cc = self.m.cond(diff);
                self.m.assign(flag_group(flags::SCZO), cc);
                self.adjust(di, step);
            }
        }
        Ok(())
    }

    /// A repeated string instruction as a loop on the count register that
    /// exits to `exit`.
    fn rep(&mut self, s: &X86Instruction, rep: RepPrefix, exit: Address) -> Result<(), LiftError> {
        let cx = self.sized(Register::ECX, s.address_width.bit_size());
        let done = self.m.eq0(self.reg(cx));
        self.m.branch(done, exit);
        self.string(s)?;
        self.adjust(cx, -1);
        if matches!(s.opcode, Opcode::Cmps | Opcode::Cmpsb | Opcode::Scas | Opcode::Scasb) {
            let cc = match rep {
                RepPrefix::Repne => ConditionCode::Eq,
                _ => ConditionCode::Ne,
            };
            let stop = self.m.test(cc, flag_group(flags::ZF));
            self.m.branch(stop, exit);
        }
        self.m.goto(Expression::CodeAddress(self.instr.address));
        self.m.set_class(RtlClass::ConditionalTransfer);
        Ok(())
    }

    /// A prefix decoded as its own instruction merges with the string
    /// instruction after it. Before anything else it is a no-op.
    fn rep_prefix(
        &mut self,
        rep: RepPrefix,
        lookahead: &mut dyn Lookahead<X86Instruction>,
    ) -> Result<(), LiftError> {
        let is_string = lookahead
            .peek()
            .map(|next| next.opcode.is_string_instruction())
            .unwrap_or(false);
        if is_string {
            if let Some(next) = lookahead.consume() {
                return self.rep(&next, rep, next.next_address());
            }
        }
        self.m.nop();
        Ok(())
    }

    // ---- x87 ----

    fn fpu_load_constant(&mut self, value: f64) -> Result<(), LiftError> {
        self.adjust(Register::TOP, -1);
        self.m.assign(self.reg(Register::ST0), Constant::real64(value));
        Ok(())
    }

    fn fchs(&mut self) -> Result<(), LiftError> {
        let st0 = self.reg(Register::ST0);
        let v = self.m.neg(st0.clone());
        self.m.assign(st0, v);
        Ok(())
    }

    fn fpu_unary(&mut self, name: &str) -> Result<(), LiftError> {
        let st0 = self.reg(Register::ST0);
        let v = self.m.fn_call(name, DataType::Real80, vec![st0.clone()])?;
        self.m.assign(st0, v);
        Ok(())
    }

    fn fpatan(&mut self) -> Result<(), LiftError> {
        let st1 = self.reg(Register::ST1);
        let v = self
            .m
            .fn_call(names::ATAN, DataType::Real80, vec![st1.clone(), self.reg(Register::ST0)])?;
        self.m.assign(st1, v);
        self.adjust(Register::TOP, 1);
        Ok(())
    }

    fn fpu_memory(&self, mem: &MemoryOperand, integer: bool) -> (Expression, DataType) {
        let bits = mem.width.bit_size();
        let width = if integer { DataType::int(bits) } else { DataType::real(bits) };
        (self.memory(&MemoryOperand { width, ..mem.clone() }), width)
    }

    /// An x87 source operand widened to extended precision.
    fn fpu_value(&self, op: &Operand, integer: bool) -> Expression {
        match op {
            Operand::Memory(mem) => match self.fpu_memory(mem, integer) {
                (value, DataType::Real80) => value,
                (value, _) => self.m.cast(DataType::Real80, value),
            },
            other => self.read(other, DataType::Real80),
        }
    }

    /// `fld`/`fild`: push onto the register stack. A stack register source
    /// is one slot deeper once Top has moved.
    fn fld(&mut self, integer: bool) -> Result<(), LiftError> {
        let src_op = self.operand(0)?;
        let value = match src_op.as_register().and_then(Register::fpu_index) {
            Some(i) => self.reg(Register::fpu(i + 1)),
            None => self.fpu_value(src_op, integer),
        };
        self.adjust(Register::TOP, -1);
        self.m.assign(self.reg(Register::ST0), value);
        Ok(())
    }

    fn fpu_store(&mut self, integer: bool, pop: bool) -> Result<(), LiftError> {
        let st0 = self.reg(Register::ST0);
        match self.operand(0)? {
            Operand::Memory(mem) => {
                let (dst, width) = self.fpu_memory(mem, integer);
                let value = if width == DataType::Real80 { st0 } else { self.m.cast(width, st0) };
                self.m.assign(dst, value);
            }
            other => {
                let dst = self.read(other, DataType::Real80);
                if dst != st0 {
                    self.m.assign(dst, st0);
                }
            }
        }
        if pop {
            self.adjust(Register::TOP, 1);
        }
        Ok(())
    }

    /// Destination and source of a two-operand x87 operation. With no
    /// operands the popping forms work on st(1) and st(0); a single register
    /// operand of a popping form is the destination.
    fn fpu_operands(&self, pop: bool, integer: bool) -> Result<(Expression, Expression), LiftError> {
        let st0 = self.reg(Register::ST0);
        match self.instr.operands.as_slice() {
            [] => Ok((self.reg(Register::ST1), st0)),
            [dst @ Operand::Register(_)] if pop => Ok((self.read(dst, DataType::Real80), st0)),
            [src] => Ok((st0, self.fpu_value(src, integer))),
            [dst, src] => Ok((self.read(dst, DataType::Real80), self.fpu_value(src, integer))),
            _ => Err(LiftError::MalformedInstruction {
                address: self.instr.address,
                reason: format!("{} takes at most two operands", self.instr.mnemonic),
            }),
        }
    }

    fn fpu_arith(&mut self, op: BinaryOp, reversed: bool, pop: bool) -> Result<(), LiftError> {
        let (dst, src) = self.fpu_operands(pop, false)?;
        let value = if reversed {
            self.m.binary(op, DataType::Real80, src, dst.clone())
        } else {
            self.m.binary(op, DataType::Real80, dst.clone(), src)
        };
        self.m.assign(dst, value);
        if pop {
            self.adjust(Register::TOP, 1);
        }
        Ok(())
    }

    fn fpu_int_arith(&mut self, op: BinaryOp, reversed: bool) -> Result<(), LiftError> {
        let st0 = self.reg(Register::ST0);
        let src = self.fpu_value(self.operand(0)?, true);
        let value = if reversed {
            self.m.binary(op, DataType::Real80, src, st0.clone())
        } else {
            self.m.binary(op, DataType::Real80, st0.clone(), src)
        };
        self.m.assign(st0, value);
        Ok(())
    }

    /// Compare st(0) with the last operand, or st(1) when there is none,
    /// then pop `pops` times.
    fn fcom(&mut self, integer: bool, pops: i64) -> Result<(), LiftError> {
        let src = match self.instr.operands.last() {
            Some(op) => self.fpu_value(op, integer),
            None => self.reg(Register::ST1),
        };
        let diff = self.m.binary(BinaryOp::FSub, DataType::Real80, self.reg(Register::ST0), src);
        let cc = self.m.cond(diff);
        self.m.assign(fpu_flags(), cc);
        if pops > 0 {
            self.adjust(Register::TOP, pops);
        }
        Ok(())
    }

    fn ftst(&mut self) -> Result<(), LiftError> {
        let zero = Constant::real64(0.0).into();
        let diff = self.m.binary(BinaryOp::FSub, DataType::Real80, self.reg(Register::ST0), zero);
        let cc = self.m.cond(diff);
        self.m.assign(fpu_flags(), cc);
        Ok(())
    }

    fn fxam(&mut self) -> Result<(), LiftError> {
        let class = self
            .m
            .fn_call(names::FXAM, DataType::Byte, vec![self.reg(Register::ST0)])?;
        self.m.assign(fpu_flags(), class);
        Ok(())
    }

    fn fxch(&mut self) -> Result<(), LiftError> {
        let other = match self.instr.operands.last().and_then(Operand::as_register) {
            Some(r) => r,
            None => Register::ST1,
        };
        if other == Register::ST0 {
            self.m.nop();
            return Ok(());
        }
        let st0 = self.reg(Register::ST0);
        let tmp = self.m.temporary(DataType::Real80);
        self.m.assign(tmp.clone(), st0.clone());
        self.m.assign(st0, self.reg(other));
        self.m.assign(self.reg(other), tmp);
        Ok(())
    }

    fn fldcw(&mut self) -> Result<(), LiftError> {
        let src = self.read(self.operand(0)?, DataType::Word16);
        self.m.assign(self.reg(Register::FPUCW), src);
        Ok(())
    }

    /// `fstcw`/`fstsw`: store a control or status word.
    fn fpu_save(&mut self, word: Register) -> Result<(), LiftError> {
        let dst = match self.instr.op(0) {
            Some(op) => self.read(op, DataType::Word16),
            None => self.reg(Register::AX),
        };
        self.m.assign(dst, self.reg(word));
        Ok(())
    }

    /// st(0) becomes the sine and the cosine is pushed above it.
    fn fsincos(&mut self) -> Result<(), LiftError> {
        let angle = self.m.temporary(DataType::Real80);
        self.m.assign(angle.clone(), self.reg(Register::ST0));
        self.adjust(Register::TOP, -1);
        let sin = self.m.fn_call(names::SIN, DataType::Real80, vec![angle.clone().into()])?;
        self.m.assign(self.reg(Register::ST1), sin);
        let cos = self.m.fn_call(names::COS, DataType::Real80, vec![angle.into()])?;
        self.m.assign(self.reg(Register::ST0), cos);
        Ok(())
    }

    fn fyl2x(&mut self) -> Result<(), LiftError> {
        let st1 = self.reg(Register::ST1);
        let log = self
            .m
            .fn_call(names::LG2, DataType::Real80, vec![self.reg(Register::ST0)])?;
        let value = self.m.binary(BinaryOp::FMul, DataType::Real80, st1.clone(), log);
        self.m.assign(st1, value);
        self.adjust(Register::TOP, 1);
        Ok(())
    }
}
