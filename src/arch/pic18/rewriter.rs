//! Lowering of PIC18 instructions to RTL.
//!
//! File operands are resolved through the same [`DataMemory`] rules the
//! renderer uses. Accesses to the INDF/POSTINC/POSTDEC/PREINC/PLUSW windows
//! become memory accesses through the matching FSR, with pointer updates
//! emitted around the access. Skip instructions become conditional branches
//! over the next instruction, whose length is taken from the lookahead.
//!
//! [`DataMemory`]: super::memory::DataMemory

use std::sync::Arc;

use super::instruction::Pic18Instruction;
use super::memory::DataLocation;
use super::opcodes::Opcode;
use super::operands::{BankedAddress, Destination, Operand, TableMode};
use super::registers::{shadows, Indirect, RegisterCatalog};
use crate::emitter::RtlEmitter;
use crate::ir::{BinaryOp, ConditionCode, DataType, Expression, Identifier, RtlClass};
use crate::pseudo::names;
use crate::rewriter::{emit_copy, CopyFlags, FlagModel, InstructionRewriter};
use crate::stream::Lookahead;
use crate::{Address, Architecture, LiftError};

/// STATUS register bits.
pub mod status {
    pub const C: u32 = 0x01;
    pub const DC: u32 = 0x02;
    pub const Z: u32 = 0x04;
    pub const OV: u32 = 0x08;
    pub const N: u32 = 0x10;
    pub const ALL: u32 = C | DC | Z | OV | N;
    pub const ZN: u32 = Z | N;
}

/// Flag group over the STATUS bits in `mask`, named after its bits.
pub fn status_flags(mask: u32) -> Identifier {
    const BITS: [(u32, &str); 5] = [
        (status::C, "C"),
        (status::DC, "DC"),
        (status::Z, "Z"),
        (status::OV, "OV"),
        (status::N, "N"),
    ];
    let name: String = BITS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    Identifier::flag_group(name, "STATUS", mask)
}

struct StatusFlags(u32);

impl FlagModel for StatusFlags {
    fn cc_group(&self) -> Identifier {
        status_flags(self.0)
    }

    fn carry(&self) -> Identifier {
        status_flags(status::C)
    }
}

/// Rewriter for one PIC18 device. Cheap to clone; the catalog is shared.
#[derive(Debug, Clone)]
pub struct Pic18Rewriter {
    catalog: Arc<RegisterCatalog>,
}

impl Pic18Rewriter {
    pub fn new(catalog: Arc<RegisterCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }
}

impl InstructionRewriter for Pic18Rewriter {
    type Instr = Pic18Instruction;

    fn architecture(&self) -> Architecture {
        Architecture::Pic18
    }

    fn rewrite(
        &self,
        instr: &Pic18Instruction,
        lookahead: &mut dyn Lookahead<Pic18Instruction>,
        m: &mut RtlEmitter<'_>,
    ) -> Result<(), LiftError> {
        log::trace!("rewriting {} at 0x{:06X}", instr.opcode, instr.address);
        let mut lowering = Lowering {
            catalog: &self.catalog,
            instr,
            m,
            post_updates: Vec::new(),
        };
        lowering.rewrite(lookahead)?;
        lowering.flush_post_updates();
        Ok(())
    }
}

struct Lowering<'a, 'e, 'h> {
    catalog: &'a RegisterCatalog,
    instr: &'a Pic18Instruction,
    m: &'e mut RtlEmitter<'h>,
    /// Pending FSR adjustments from POSTINC/POSTDEC accesses.
    post_updates: Vec<(u8, i64)>,
}

impl<'a> Lowering<'a, '_, '_> {
    fn rewrite(&mut self, lookahead: &mut dyn Lookahead<Pic18Instruction>) -> Result<(), LiftError> {
        use Opcode::*;
        match self.instr.opcode {
            Addwf => self.arith(|m, w, f| m.iadd(w, f), status::ALL),
            Addwfc => self.arith(|m, w, f| m.iadd(m.iadd(w, f), carry()), status::ALL),
            Subwf => self.arith(|m, w, f| m.isub(f, w), status::ALL),
            Subwfb => self.arith(|m, w, f| m.isub(m.isub(f, w), m.not(carry())), status::ALL),
            Subfwb => self.arith(|m, w, f| m.isub(m.isub(w, f), m.not(carry())), status::ALL),
            Incf => self.arith(|m, _, f| m.add_imm(f, 1), status::ALL),
            Decf => self.arith(|m, _, f| m.add_imm(f, -1), status::ALL),
            Andwf => self.arith(|m, w, f| m.and(w, f), status::ZN),
            Iorwf => self.arith(|m, w, f| m.or(w, f), status::ZN),
            Xorwf => self.arith(|m, w, f| m.xor(w, f), status::ZN),
            Comf => self.arith(|m, _, f| m.comp(f), status::ZN),
            Movf => self.arith(|_, _, f| f, status::ZN),
            Rlncf => self.rotate(names::ROL, false),
            Rrncf => self.rotate(names::ROR, false),
            Rlcf => self.rotate(names::RLCF, true),
            Rrcf => self.rotate(names::RRCF, true),
            Swapf => self.swapf(),
            Negf => self.negf(),
            Clrf => self.clrf(),
            Setf => {
                let ones = self.m.byte(0xFF);
                self.store_file(ones)
            }
            Movwf => self.store_file(self.wreg()),
            Mulwf => self.mulwf(),
            Daw => self.daw(),
            Bcf => self.bit_op(BinaryOp::And),
            Bsf => self.bit_op(BinaryOp::Or),
            Btg => self.bit_op(BinaryOp::Xor),
            Decfsz => self.count_and_skip(-1, true, lookahead),
            Dcfsnz => self.count_and_skip(-1, false, lookahead),
            Incfsz => self.count_and_skip(1, true, lookahead),
            Infsnz => self.count_and_skip(1, false, lookahead),
            Cpfseq => self.compare_and_skip(BinaryOp::Eq, lookahead),
            Cpfsgt => self.compare_and_skip(BinaryOp::Ugt, lookahead),
            Cpfslt => self.compare_and_skip(BinaryOp::Ult, lookahead),
            Tstfsz => self.tstfsz(lookahead),
            Btfsc => self.bit_test_and_skip(false, lookahead),
            Btfss => self.bit_test_and_skip(true, lookahead),
            Bz => self.branch_on(ConditionCode::Eq, status::Z),
            Bnz => self.branch_on(ConditionCode::Ne, status::Z),
            Bc => self.branch_on(ConditionCode::Ult, status::C),
            Bnc => self.branch_on(ConditionCode::Uge, status::C),
            Bov => self.branch_on(ConditionCode::Ov, status::OV),
            Bnov => self.branch_on(ConditionCode::No, status::OV),
            Bn => self.branch_on(ConditionCode::Lt, status::N),
            Bnn => self.branch_on(ConditionCode::Ge, status::N),
            Bra | Goto => {
                let target = self.code_target(0)?;
                self.m.goto(Expression::CodeAddress(target));
                Ok(())
            }
            Call | Rcall => self.call(),
            Callw => self.callw(),
            Return => self.ret(),
            Retfie => self.retfie(),
            Retlw => self.retlw(),
            Addulnk => self.unlink(1),
            Subulnk => self.unlink(-1),
            Addfsr => self.adjust_fsr(1),
            Subfsr => self.adjust_fsr(-1),
            Lfsr => self.lfsr(),
            Movlb => {
                let k = self.literal(0)?;
                let bsr = self.catalog.core().bsr.clone();
                let value = self.m.byte(k);
                self.m.assign(bsr, value);
                Ok(())
            }
            Movlw => self.literal_op(|_, _, k| k, 0),
            Addlw => self.literal_op(|m, w, k| m.iadd(w, k), status::ALL),
            Sublw => self.literal_op(|m, w, k| m.isub(k, w), status::ALL),
            Andlw => self.literal_op(|m, w, k| m.and(w, k), status::ZN),
            Iorlw => self.literal_op(|m, w, k| m.or(w, k), status::ZN),
            Xorlw => self.literal_op(|m, w, k| m.xor(w, k), status::ZN),
            Mullw => self.mullw(),
            Pushl => self.pushl(),
            Push => self.push(),
            Pop => {
                let stkptr: Expression = self.catalog.core().stkptr.clone().into();
                let dec = self.m.add_imm(stkptr.clone(), -1);
                self.m.assign(stkptr, dec);
                Ok(())
            }
            Tblrd => self.tblrd(),
            Tblwt => self.tblwt(),
            Movff | Movffl | Movsf | Movsfl => self.far_move(),
            Movss => self.movss(),
            Sleep => self.intrinsic(names::SLEEP),
            Clrwdt => self.intrinsic(names::CLRWDT),
            Reset => {
                self.intrinsic(names::RESET)?;
                self.m.set_class(RtlClass::Terminates);
                Ok(())
            }
            Nop => {
                self.m.nop();
                Ok(())
            }
            Db | Dw | De | Ascii | Idlocs | Config | Invalid => {
                self.m.invalid();
                Ok(())
            }
        }
    }

    // ---- operand access ----

    fn operand(&self, i: usize) -> Result<&'a Operand, LiftError> {
        let instr = self.instr;
        instr.op(i).ok_or_else(|| self.malformed(&format!("needs operand {}", i + 1)))
    }

    fn malformed(&self, reason: &str) -> LiftError {
        LiftError::MalformedInstruction {
            address: self.instr.address,
            reason: format!("{} {}", self.instr.opcode, reason),
        }
    }

    fn literal(&self, i: usize) -> Result<u8, LiftError> {
        match self.operand(i)? {
            Operand::Imm4(k) | Operand::Imm6(k) | Operand::Imm8(k) => Ok(*k),
            _ => Err(self.malformed("expects a literal")),
        }
    }

    fn code_target(&self, i: usize) -> Result<Address, LiftError> {
        self.operand(i)?
            .code_target()
            .ok_or_else(|| self.malformed("expects a code address"))
    }

    fn fast(&self, i: usize) -> bool {
        matches!(self.instr.op(i), Some(Operand::Shadow(true)))
    }

    fn fsr_number(&self, i: usize) -> Result<u8, LiftError> {
        match self.operand(i)? {
            Operand::FsrNum(n) if *n < 3 => Ok(*n),
            _ => Err(self.malformed("expects FSR0, FSR1 or FSR2")),
        }
    }

    fn fsr(&self, n: u8) -> Expression {
        let core = self.catalog.core();
        core.fsr[usize::from(n).min(core.fsr.len() - 1)].clone().into()
    }

    fn wreg(&self) -> Expression {
        self.catalog.core().wreg.clone().into()
    }

    fn banked(&self) -> Result<BankedAddress, LiftError> {
        match self.operand(0)? {
            Operand::Banked(addr) => Ok(*addr),
            _ => Err(self.malformed("expects a file register")),
        }
    }

    fn banked_dest(&self) -> Result<(BankedAddress, Destination), LiftError> {
        match self.operand(0)? {
            Operand::BankedDest { addr, dest } => Ok((*addr, *dest)),
            _ => Err(self.malformed("expects a file register and destination")),
        }
    }

    fn banked_bit(&self) -> Result<(BankedAddress, u8), LiftError> {
        match self.operand(0)? {
            Operand::BankedBit { addr, bit } => Ok((*addr, *bit)),
            _ => Err(self.malformed("expects a file register bit")),
        }
    }

    // ---- data memory ----

    /// The storage a file-register operand denotes.
    fn file(&mut self, addr: &BankedAddress) -> Expression {
        match addr.location(self.catalog) {
            DataLocation::Indexed(k) => self.fsr2_indexed(k),
            DataLocation::Banked(k) => {
                let bsr: Expression = self.catalog.core().bsr.clone().into();
                let offset = self.m.byte(k);
                let ea = self.m.seq(DataType::Ptr16, bsr, offset);
                self.m.mem(DataType::Byte, ea)
            }
            DataLocation::Absolute(address) => self.absolute(address),
        }
    }

    fn fsr2_indexed(&self, k: u8) -> Expression {
        let ea = self.m.add_imm(self.fsr(2), k as i64);
        self.m.mem(DataType::Byte, ea)
    }

    /// A full data address: an SFR, an indirect window, or plain RAM.
    fn absolute(&mut self, address: u16) -> Expression {
        if let Some((kind, n)) = self.catalog.indirect(address) {
            return self.indirect(kind, n);
        }
        match self.catalog.lookup(address, 8) {
            Some(reg) => reg.identifier().into(),
            None => {
                let ea = self.m.word(address as u64, DataType::Ptr16);
                self.m.mem(DataType::Byte, ea)
            }
        }
    }

    fn indirect(&mut self, kind: Indirect, n: u8) -> Expression {
        let fsr = self.fsr(n);
        match kind {
            Indirect::Indf => self.m.mem(DataType::Byte, fsr),
            Indirect::PostInc => {
                self.post_updates.push((n, 1));
                self.m.mem(DataType::Byte, fsr)
            }
            Indirect::PostDec => {
                self.post_updates.push((n, -1));
                self.m.mem(DataType::Byte, fsr)
            }
            Indirect::PreInc => {
                let inc = self.m.add_imm(fsr.clone(), 1);
                self.m.assign(fsr.clone(), inc);
                self.m.mem(DataType::Byte, fsr)
            }
            Indirect::PlusW => {
                let index = self.m.cast(DataType::Int16, self.wreg());
                let ea = self.m.iadd(fsr, index);
                self.m.mem(DataType::Byte, ea)
            }
        }
    }

    fn flush_post_updates(&mut self) {
        for (n, delta) in std::mem::take(&mut self.post_updates) {
            let fsr = self.fsr(n);
            let value = self.m.add_imm(fsr.clone(), delta);
            self.m.assign(fsr, value);
        }
    }

    /// Source file register and result location of a `f,d,a` instruction.
    fn file_and_dest(&mut self) -> Result<(Expression, Expression), LiftError> {
        let (addr, dest) = self.banked_dest()?;
        let f = self.file(&addr);
        let dst = match dest {
            Destination::W => self.wreg(),
            Destination::F => f.clone(),
        };
        Ok((f, dst))
    }

    fn store(&mut self, dst: Expression, src: Expression, flags: u32) -> Expression {
        let copy = if flags == 0 {
            CopyFlags::SPLIT
        } else {
            CopyFlags::SPLIT_CC
        };
        emit_copy(self.m, &StatusFlags(flags), dst, src, copy)
    }

    // ---- byte operations ----

    fn arith(
        &mut self,
        op: impl Fn(&RtlEmitter<'_>, Expression, Expression) -> Expression,
        flags: u32,
    ) -> Result<(), LiftError> {
        let (f, dst) = self.file_and_dest()?;
        let src = op(&*self.m, self.wreg(), f);
        self.store(dst, src, flags);
        Ok(())
    }

    fn rotate(&mut self, name: &str, through_carry: bool) -> Result<(), LiftError> {
        let (f, dst) = self.file_and_dest()?;
        let (second, flags) = if through_carry {
            (carry(), status::C | status::ZN)
        } else {
            (self.m.byte(1), status::ZN)
        };
        let src = self.m.fn_call(name, DataType::Byte, vec![f, second])?;
        self.store(dst, src, flags);
        Ok(())
    }

    fn swapf(&mut self) -> Result<(), LiftError> {
        let (f, dst) = self.file_and_dest()?;
        let src = self.m.fn_call(names::SWAPF, DataType::Byte, vec![f])?;
        self.store(dst, src, 0);
        Ok(())
    }

    fn negf(&mut self) -> Result<(), LiftError> {
        let addr = self.banked()?;
        let f = self.file(&addr);
        let src = self.m.neg(f.clone());
        let flags = status::DC | status::Z | status::OV | status::N;
        emit_copy(
            self.m,
            &StatusFlags(flags),
            f,
            src,
            CopyFlags::SPLIT_CC.with_carry_if_zero(),
        );
        Ok(())
    }

    fn clrf(&mut self) -> Result<(), LiftError> {
        let addr = self.banked()?;
        let f = self.file(&addr);
        let zero = self.m.byte(0);
        self.m.assign(f, zero);
        let set = self.m.bool(true);
        self.m.assign(status_flags(status::Z), set);
        Ok(())
    }

    fn store_file(&mut self, value: Expression) -> Result<(), LiftError> {
        let addr = self.banked()?;
        let f = self.file(&addr);
        self.m.assign(f, value);
        Ok(())
    }

    fn mulwf(&mut self) -> Result<(), LiftError> {
        let addr = self.banked()?;
        let f = self.file(&addr);
        let product = self.m.umul(DataType::UInt16, self.wreg(), f);
        let prod = self.catalog.core().prod.clone();
        self.m.assign(prod, product);
        Ok(())
    }

    fn daw(&mut self) -> Result<(), LiftError> {
        let w = self.wreg();
        let args = vec![w.clone(), carry(), status_flags(status::DC).into()];
        let adjusted = self.m.fn_call(names::DAW, DataType::Byte, args)?;
        self.store(w, adjusted, status::C);
        Ok(())
    }

    fn bit_op(&mut self, op: BinaryOp) -> Result<(), LiftError> {
        let (addr, bit) = self.banked_bit()?;
        let f = self.file(&addr);
        let mask = if op == BinaryOp::And {
            !(1u8 << bit)
        } else {
            1u8 << bit
        };
        let mask = self.m.byte(mask);
        let src = self.m.binary(op, DataType::Byte, f.clone(), mask);
        self.store(f, src, 0);
        Ok(())
    }

    // ---- skips and branches ----

    /// Address past the instruction a skip jumps over.
    fn skip_target(&self, lookahead: &mut dyn Lookahead<Pic18Instruction>) -> Address {
        match lookahead.peek() {
            Some(next) => next.next_address(),
            None => self.instr.next_address() + 2,
        }
    }

    fn skip_if(&mut self, condition: Expression, lookahead: &mut dyn Lookahead<Pic18Instruction>) {
        let target = self.skip_target(lookahead);
        self.flush_post_updates();
        self.m.branch(condition, target);
    }

    fn count_and_skip(
        &mut self,
        delta: i64,
        skip_on_zero: bool,
        lookahead: &mut dyn Lookahead<Pic18Instruction>,
    ) -> Result<(), LiftError> {
        let (f, dst) = self.file_and_dest()?;
        let src = self.m.add_imm(f, delta);
        let value = self.store(dst, src, 0);
        let condition = if skip_on_zero {
            self.m.eq0(value)
        } else {
            self.m.ne0(value)
        };
        self.skip_if(condition, lookahead);
        Ok(())
    }

    fn compare_and_skip(
        &mut self,
        op: BinaryOp,
        lookahead: &mut dyn Lookahead<Pic18Instruction>,
    ) -> Result<(), LiftError> {
        let addr = self.banked()?;
        let f = self.file(&addr);
        let condition = self.m.binary(op, DataType::Bool, f, self.wreg());
        self.skip_if(condition, lookahead);
        Ok(())
    }

    fn tstfsz(&mut self, lookahead: &mut dyn Lookahead<Pic18Instruction>) -> Result<(), LiftError> {
        let addr = self.banked()?;
        let f = self.file(&addr);
        let condition = self.m.eq0(f);
        self.skip_if(condition, lookahead);
        Ok(())
    }

    fn bit_test_and_skip(
        &mut self,
        skip_if_set: bool,
        lookahead: &mut dyn Lookahead<Pic18Instruction>,
    ) -> Result<(), LiftError> {
        let (addr, bit) = self.banked_bit()?;
        let f = self.file(&addr);
        let mask = self.m.byte(1 << bit);
        let masked = self.m.and(f, mask);
        let condition = if skip_if_set {
            self.m.ne0(masked)
        } else {
            self.m.eq0(masked)
        };
        self.skip_if(condition, lookahead);
        Ok(())
    }

    fn branch_on(&mut self, cc: ConditionCode, flag: u32) -> Result<(), LiftError> {
        let target = self.code_target(0)?;
        let condition = self.m.test(cc, status_flags(flag));
        self.m.branch(condition, target);
        Ok(())
    }

    // ---- calls and returns ----

    fn save_shadows(&mut self) {
        let core = self.catalog.core();
        let live = [&core.wreg, &core.status, &core.bsr];
        for (shadow, reg) in shadows().into_iter().zip(live) {
            self.m.assign(shadow, reg);
        }
    }

    fn restore_shadows(&mut self) {
        let core = self.catalog.core();
        let live = [&core.wreg, &core.status, &core.bsr];
        for (shadow, reg) in shadows().into_iter().zip(live) {
            self.m.assign(reg, shadow);
        }
    }

    fn call(&mut self) -> Result<(), LiftError> {
        let target = self.code_target(0)?;
        if self.fast(1) {
            self.save_shadows();
        }
        self.m.call(Expression::CodeAddress(target), 0);
        Ok(())
    }

    fn callw(&mut self) -> Result<(), LiftError> {
        let core = self.catalog.core();
        let low = self.m.seq(DataType::Word16, core.pclath.clone().into(), self.wreg());
        let target = self.m.seq(DataType::Ptr32, core.pclatu.clone().into(), low);
        self.m.call(target, 0);
        Ok(())
    }

    fn ret(&mut self) -> Result<(), LiftError> {
        if self.fast(0) {
            self.restore_shadows();
        }
        self.m.ret(0, 0);
        Ok(())
    }

    fn retfie(&mut self) -> Result<(), LiftError> {
        if self.fast(0) {
            self.restore_shadows();
        }
        let gie = ["GIE", "GIEH"]
            .iter()
            .find_map(|name| self.catalog.bit_field_by_name(name))
            .map(|(reg, field)| (reg.identifier(), field.bit));
        match gie {
            Some((intcon, bit)) => {
                let mask = self.m.byte(1u8 << bit);
                let value = self.m.binary(BinaryOp::Or, DataType::Byte, intcon.clone().into(), mask);
                self.m.assign(intcon, value);
            }
            None => log::debug!("{} has no GIE bit; RETFIE leaves interrupts alone", self.catalog.device()),
        }
        self.m.ret(0, 0);
        Ok(())
    }

    fn retlw(&mut self) -> Result<(), LiftError> {
        let k = self.literal(0)?;
        let value = self.m.byte(k);
        let w = self.wreg();
        self.m.assign(w, value);
        self.m.ret(0, 0);
        Ok(())
    }

    fn unlink(&mut self, sign: i64) -> Result<(), LiftError> {
        let k = self.literal(0)?;
        let fsr2 = self.fsr(2);
        let value = self.m.add_imm(fsr2.clone(), sign * k as i64);
        self.m.assign(fsr2, value);
        self.m.ret(0, 0);
        Ok(())
    }

    // ---- FSR and literal operations ----

    fn adjust_fsr(&mut self, sign: i64) -> Result<(), LiftError> {
        let n = self.fsr_number(0)?;
        let k = self.literal(1)?;
        let fsr = self.fsr(n);
        let value = self.m.add_imm(fsr.clone(), sign * k as i64);
        self.m.assign(fsr, value);
        Ok(())
    }

    fn lfsr(&mut self) -> Result<(), LiftError> {
        let n = self.fsr_number(0)?;
        let k = match self.operand(1)? {
            Operand::Imm12(k) | Operand::Imm14(k) => *k,
            _ => return Err(self.malformed("expects a 12- or 14-bit literal")),
        };
        let value = self.m.word(k as u64, DataType::Word16);
        let fsr = self.fsr(n);
        self.m.assign(fsr, value);
        Ok(())
    }

    fn literal_op(
        &mut self,
        op: impl Fn(&RtlEmitter<'_>, Expression, Expression) -> Expression,
        flags: u32,
    ) -> Result<(), LiftError> {
        let k = self.literal(0)?;
        let k = self.m.byte(k);
        let w = self.wreg();
        let src = op(&*self.m, w.clone(), k);
        self.store(w, src, flags);
        Ok(())
    }

    fn mullw(&mut self) -> Result<(), LiftError> {
        let k = self.literal(0)?;
        let k = self.m.byte(k);
        let product = self.m.umul(DataType::UInt16, self.wreg(), k);
        let prod = self.catalog.core().prod.clone();
        self.m.assign(prod, product);
        Ok(())
    }

    // ---- stack ----

    fn pushl(&mut self) -> Result<(), LiftError> {
        let k = self.literal(0)?;
        let fsr2 = self.fsr(2);
        let top = self.m.mem(DataType::Byte, fsr2.clone());
        let value = self.m.byte(k);
        self.m.assign(top, value);
        let dec = self.m.add_imm(fsr2.clone(), -1);
        self.m.assign(fsr2, dec);
        Ok(())
    }

    fn push(&mut self) -> Result<(), LiftError> {
        let core = self.catalog.core();
        let stkptr: Expression = core.stkptr.clone().into();
        let inc = self.m.add_imm(stkptr.clone(), 1);
        self.m.assign(stkptr, inc);
        self.m.assign(
            core.tos.clone(),
            Expression::CodeAddress(self.instr.next_address()),
        );
        Ok(())
    }

    // ---- table access ----

    fn table_mode(&self) -> Result<TableMode, LiftError> {
        match self.operand(0)? {
            Operand::TableMode(mode) => Ok(*mode),
            _ => Err(self.malformed("expects a table pointer mode")),
        }
    }

    /// Run `access` with TBLPTR adjusted as `mode` asks.
    fn with_table_pointer(
        &mut self,
        access: impl FnOnce(&mut Self) -> Result<(), LiftError>,
    ) -> Result<(), LiftError> {
        let mode = self.table_mode()?;
        let tblptr: Expression = self.catalog.core().tblptr.clone().into();
        if mode == TableMode::PreIncrement {
            let inc = self.m.add_imm(tblptr.clone(), 1);
            self.m.assign(tblptr.clone(), inc);
        }
        access(self)?;
        let post = match mode {
            TableMode::PostIncrement => 1,
            TableMode::PostDecrement => -1,
            _ => 0,
        };
        if post != 0 {
            let value = self.m.add_imm(tblptr.clone(), post);
            self.m.assign(tblptr, value);
        }
        Ok(())
    }

    fn tblrd(&mut self) -> Result<(), LiftError> {
        self.with_table_pointer(|this| {
            let core = this.catalog.core();
            let read = this
                .m
                .fn_call(names::TBLRD, DataType::Byte, vec![core.tblptr.clone().into()])?;
            this.m.assign(core.tablat.clone(), read);
            Ok(())
        })
    }

    fn tblwt(&mut self) -> Result<(), LiftError> {
        self.with_table_pointer(|this| {
            let core = this.catalog.core();
            let args = vec![core.tblptr.clone().into(), core.tablat.clone().into()];
            let write = this.m.fn_call(names::TBLWT, DataType::Void, args)?;
            this.m.side_effect(write);
            Ok(())
        })
    }

    // ---- far moves ----

    fn far_source(&mut self) -> Result<Expression, LiftError> {
        match self.operand(0)? {
            Operand::DataAbs12(a) | Operand::DataAbs14(a) => Ok(self.absolute(*a)),
            Operand::Fsr2Index(k) => Ok(self.fsr2_indexed(*k)),
            _ => Err(self.malformed("expects a data address")),
        }
    }

    /// MOVFF, MOVFFL, MOVSF, MOVSFL. Forbidden destinations make the
    /// instruction invalid.
    fn far_move(&mut self) -> Result<(), LiftError> {
        let dst_address = match self.operand(1)? {
            Operand::DataAbs12(a) | Operand::DataAbs14(a) => *a,
            _ => return Err(self.malformed("expects a destination address")),
        };
        if self.catalog.is_forbidden_destination(dst_address) {
            log::warn!(
                "{} at 0x{:06X} writes forbidden destination 0x{:X}",
                self.instr.opcode,
                self.instr.address,
                dst_address
            );
            self.post_updates.clear();
            self.m.invalid();
            return Ok(());
        }
        let src = self.far_source()?;
        let dst = self.absolute(dst_address);
        self.m.assign(dst, src);
        Ok(())
    }

    fn movss(&mut self) -> Result<(), LiftError> {
        let (zs, zd) = match (self.operand(0)?, self.operand(1)?) {
            (Operand::Fsr2Index(zs), Operand::Fsr2Index(zd)) => (*zs, *zd),
            _ => return Err(self.malformed("expects two FSR2 offsets")),
        };
        let src = self.fsr2_indexed(zs);
        let dst = self.fsr2_indexed(zd);
        self.m.assign(dst, src);
        Ok(())
    }

    fn intrinsic(&mut self, name: &str) -> Result<(), LiftError> {
        let call = self.m.fn_call(name, DataType::Void, Vec::new())?;
        self.m.side_effect(call);
        Ok(())
    }
}

fn carry() -> Expression {
    status_flags(status::C).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pic18::{devices, ExecMode, Pic18Decoder};
    use crate::ir::{InstructionCluster, RtlInstruction};
    use crate::pseudo::PseudoProcedureTable;
    use crate::rewrite_image;

    fn lift_at(words: &[u16], mode: ExecMode, base: Address) -> Vec<InstructionCluster> {
        let config = devices::builtin("pic18f4620").unwrap();
        let catalog = Arc::new(RegisterCatalog::load(Some(&config)).unwrap());
        let decoder = Pic18Decoder::new(catalog.family(), mode);
        let rewriter = Pic18Rewriter::new(catalog);
        let host = PseudoProcedureTable::new();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        rewrite_image(&decoder, &rewriter, &host, &bytes, base)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn lift(words: &[u16]) -> Vec<InstructionCluster> {
        lift_at(words, ExecMode::Traditional, 0x100)
    }

    #[test]
    fn test_flag_group_names() {
        assert_eq!(status_flags(status::ALL).name, "CDCZOVN");
        assert_eq!(status_flags(status::ZN).name, "ZN");
        assert_eq!(status_flags(status::C).data_type, DataType::Bool);
    }

    #[test]
    fn test_addwf_to_memory_splits() {
        let clusters = lift(&[0x2620]);
        assert_eq!(
            clusters[0].rendered(),
            vec![
                "v0 = WREG + Mem[0x0020:byte]",
                "Mem[0x0020:byte] = v0",
                "CDCZOVN = cond(v0)",
            ]
        );
        assert_eq!(clusters[0].class, RtlClass::Linear);
    }

    #[test]
    fn test_movf_to_w() {
        let clusters = lift(&[0x5020]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["WREG = Mem[0x0020:byte]", "ZN = cond(WREG)"]
        );
    }

    #[test]
    fn test_indirect_windows() {
        // MOVWF POSTINC0
        let clusters = lift(&[0x6EEE]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["Mem[FSR0:byte] = WREG", "FSR0 = FSR0 + 0x0001"]
        );
        // MOVF PLUSW2,W
        let clusters = lift(&[0x50DB]);
        assert_eq!(
            clusters[0].rendered()[0],
            "WREG = Mem[FSR2 + ((int16) WREG):byte]"
        );
        // CLRF PREINC1
        let clusters = lift(&[0x6AE4]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["FSR1 = FSR1 + 0x0001", "Mem[FSR1:byte] = 0x00", "Z = true"]
        );
    }

    #[test]
    fn test_indexed_and_banked_operands() {
        let clusters = lift_at(&[0x6E05], ExecMode::Extended, 0);
        assert_eq!(clusters[0].rendered(), vec!["Mem[FSR2 + 0x0005:byte] = WREG"]);
        let clusters = lift(&[0x6F20]);
        assert_eq!(clusters[0].rendered(), vec!["Mem[SEQ(BSR, 0x20):byte] = WREG"]);
        let clusters = lift(&[0x6ED8]);
        assert_eq!(clusters[0].rendered(), vec!["STATUS = WREG"]);
    }

    #[test]
    fn test_skip_uses_next_instruction_length() {
        // DECFSZ 0x20,F ; NOP
        let clusters = lift(&[0x2E20, 0x0000]);
        assert_eq!(
            clusters[0].rendered(),
            vec![
                "v0 = Mem[0x0020:byte] - 0x01",
                "Mem[0x0020:byte] = v0",
                "if (v0 == 0x00) branch 00000104",
            ]
        );
        assert_eq!(clusters[0].class, RtlClass::ConditionalTransfer);
        assert_eq!(clusters.len(), 2);

        // BTFSC STATUS,Z ; GOTO 0x1000
        let clusters = lift(&[0xB4D8, 0xEF00, 0xF008]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["if ((STATUS & 0x04) == 0x00) branch 00000106"]
        );
    }

    #[test]
    fn test_skip_at_end_of_input() {
        // TSTFSZ 0x20 with nothing after it
        let clusters = lift(&[0x6620]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["if (Mem[0x0020:byte] == 0x00) branch 00000104"]
        );
    }

    #[test]
    fn test_conditional_branch() {
        let clusters = lift_at(&[0xE0FD], ExecMode::Traditional, 0x1000);
        assert_eq!(clusters[0].rendered(), vec!["if (Test(EQ,Z)) branch 00000FFC"]);
        let clusters = lift_at(&[0xE2FD], ExecMode::Traditional, 0x1000);
        assert_eq!(clusters[0].rendered(), vec!["if (Test(ULT,C)) branch 00000FFC"]);
    }

    #[test]
    fn test_fast_call_and_return() {
        let clusters = lift(&[0xED00, 0xF008, 0x0013]);
        assert_eq!(
            clusters[0].rendered(),
            vec![
                "WREG_SHAD = WREG",
                "STATUS_SHAD = STATUS",
                "BSR_SHAD = BSR",
                "call 00001000 (0)",
            ]
        );
        assert_eq!(clusters[0].class, RtlClass::Call);
        assert_eq!(clusters[0].length, 4);
        assert_eq!(
            clusters[1].rendered(),
            vec!["WREG = WREG_SHAD", "STATUS = STATUS_SHAD", "BSR = BSR_SHAD", "return (0,0)"]
        );
        assert_eq!(clusters[1].class, RtlClass::Return);
    }

    #[test]
    fn test_retfie_enables_interrupts() {
        let clusters = lift(&[0x0010]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["INTCON = INTCON | 0x80", "return (0,0)"]
        );
        assert_eq!(clusters[0].class, RtlClass::Return);
        let clusters = lift(&[0x0011]);
        assert_eq!(
            clusters[0].rendered(),
            vec![
                "WREG = WREG_SHAD",
                "STATUS = STATUS_SHAD",
                "BSR = BSR_SHAD",
                "INTCON = INTCON | 0x80",
                "return (0,0)",
            ]
        );
    }

    #[test]
    fn test_retlw_and_goto() {
        let clusters = lift(&[0x0C05, 0xEF00, 0xF008]);
        assert_eq!(clusters[0].rendered(), vec!["WREG = 0x05", "return (0,0)"]);
        assert_eq!(clusters[1].rendered(), vec!["goto 00001000"]);
        assert_eq!(clusters[1].class, RtlClass::Transfer);
    }

    #[test]
    fn test_negf_sets_carry_on_zero() {
        let clusters = lift(&[0x6C20]);
        assert_eq!(
            clusters[0].rendered(),
            vec![
                "v0 = -Mem[0x0020:byte]",
                "Mem[0x0020:byte] = v0",
                "DCZOVN = cond(v0)",
                "C = v0 == 0x00",
            ]
        );
    }

    #[test]
    fn test_rotate_through_carry() {
        // RLCF 0x20,W
        let clusters = lift(&[0x3420]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["WREG = __rlcf(Mem[0x0020:byte], C)", "CZN = cond(WREG)"]
        );
    }

    #[test]
    fn test_forbidden_far_move_is_invalid() {
        // MOVFF 0x020, PCL
        let clusters = lift(&[0xC020, 0xFFF9]);
        assert_eq!(clusters[0].class, RtlClass::Invalid);
        assert_eq!(clusters[0].instructions, vec![RtlInstruction::Invalid]);
        // MOVFF 0x020, PCLATH is allowed
        let clusters = lift(&[0xC020, 0xFFFA]);
        assert_eq!(clusters[0].rendered(), vec!["PCLATH = Mem[0x0020:byte]"]);
    }

    #[test]
    fn test_table_read_post_increment() {
        let clusters = lift(&[0x0009]);
        assert_eq!(
            clusters[0].rendered(),
            vec!["TABLAT = __tblrd(TBLPTR)", "TBLPTR = TBLPTR + 0x00000001"]
        );
    }

    #[test]
    fn test_reset_terminates() {
        let clusters = lift(&[0x00FF]);
        assert_eq!(clusters[0].rendered(), vec!["__reset()"]);
        assert_eq!(clusters[0].class, RtlClass::Terminates);
    }

    #[test]
    fn test_extended_stack_forms() {
        let clusters = lift_at(&[0xEA42, 0xE8C2], ExecMode::Extended, 0);
        assert_eq!(
            clusters[0].rendered(),
            vec!["Mem[FSR2:byte] = 0x42", "FSR2 = FSR2 - 0x0001"]
        );
        assert_eq!(clusters[1].rendered(), vec!["FSR2 = FSR2 + 0x0002", "return (0,0)"]);
    }

    #[test]
    fn test_lfsr_and_literals() {
        let clusters = lift(&[0xEE12, 0xF0AB, 0x0F01]);
        assert_eq!(clusters[0].rendered(), vec!["FSR1 = 0x02AB"]);
        assert_eq!(
            clusters[1].rendered(),
            vec!["WREG = WREG + 0x01", "CDCZOVN = cond(WREG)"]
        );
    }

    #[test]
    fn test_invalid_word() {
        let clusters = lift(&[0x0001]);
        assert_eq!(clusters[0].class, RtlClass::Invalid);
    }
}
