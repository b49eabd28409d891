//! Native PIC18 instruction decoder.
//!
//! Instructions are little-endian 16-bit words. Words that match no
//! encoding, extended instructions outside extended mode, and multi-word
//! forms whose continuation word lacks the `1111` prefix decode to a
//! one-word [`Opcode::Invalid`]. Running out of bytes mid-instruction is a
//! [`DecodeError::Truncated`].

use super::config::Family;
use super::instruction::Pic18Instruction;
use super::opcodes::Opcode;
use super::operands::{BankedAddress, Destination, Operand, PseudoData, TableMode};
use super::ExecMode;
use crate::decoder::DecodeError;
use crate::{Address, Architecture, Decoder};

/// Longest payload of one data directive.
const MAX_DIRECTIVE_BYTES: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct Pic18Decoder {
    family: Family,
    mode: ExecMode,
}

/// Word access into the bytes of one instruction.
struct Words<'b> {
    bytes: &'b [u8],
    address: Address,
}

impl Words<'_> {
    /// Word `index` of an instruction `total` words long.
    fn get(&self, index: usize, total: usize) -> Result<u16, DecodeError> {
        let at = index * 2;
        match self.bytes.get(at..at + 2) {
            Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
            None => Err(DecodeError::truncated(self.address, total * 2, self.bytes.len())),
        }
    }

    /// A continuation word, or `None` if it lacks the `1111` prefix.
    fn continuation(&self, index: usize, total: usize) -> Result<Option<u16>, DecodeError> {
        let w = self.get(index, total)?;
        Ok((w >> 12 == 0xF).then_some(w))
    }
}

type Decoded = Result<Option<Pic18Instruction>, DecodeError>;

impl Pic18Decoder {
    pub fn new(family: Family, mode: ExecMode) -> Self {
        Self { family, mode }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    fn extended(&self) -> bool {
        self.mode == ExecMode::Extended
    }

    fn enhanced(&self) -> bool {
        self.family == Family::Enhanced
    }

    fn banked(&self, w: u16) -> BankedAddress {
        BankedAddress::new(self.mode, (w & 0xFF) as u8, (w >> 8) & 1)
    }

    fn file_dest(&self, w: u16) -> Operand {
        Operand::BankedDest {
            addr: self.banked(w),
            dest: Destination::from_bit((w >> 9) & 1),
        }
    }

    fn file_bit(&self, w: u16) -> Operand {
        Operand::BankedBit {
            addr: self.banked(w),
            bit: ((w >> 9) & 7) as u8,
        }
    }

    /// Decode one data directive from the start of `bytes`.
    pub fn decode_data(&self, directive: Opcode, bytes: &[u8], address: Address) -> Decoded {
        if bytes.is_empty() {
            return Ok(None);
        }
        let take = bytes.len().min(MAX_DIRECTIVE_BYTES);
        let words = |n: usize| -> Result<Vec<u16>, DecodeError> {
            if n < 2 {
                return Err(DecodeError::truncated(address, 2, bytes.len()));
            }
            Ok(bytes[..n - n % 2]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect())
        };
        let (length, data) = match directive {
            Opcode::Db => (take, PseudoData::Bytes(bytes[..take].to_vec())),
            Opcode::De => (take, PseudoData::Eeprom(bytes[..take].to_vec())),
            Opcode::Ascii => (take, PseudoData::Ascii(bytes[..take].to_vec())),
            Opcode::Dw => {
                let w = words(take)?;
                (w.len() * 2, PseudoData::Words(w))
            }
            Opcode::Idlocs => {
                let w = words(2)?;
                (2, PseudoData::IdLocs { address, value: w[0] })
            }
            Opcode::Config => (1, PseudoData::Config { address, value: bytes[0] }),
            other => {
                return Err(DecodeError::invalid(
                    address,
                    format!("{} is not a data directive", other),
                ))
            }
        };
        Ok(Some(Pic18Instruction::new(
            address,
            length as u32,
            directive,
            vec![Operand::Data(data)],
        )))
    }

    fn decode_word0(&self, w: u16, words: &Words<'_>) -> Decoded {
        let address = words.address;
        let one = |opcode: Opcode, operands: Vec<Operand>| {
            Ok(Some(Pic18Instruction::new(address, 2, opcode, operands)))
        };
        match w >> 8 {
            0x00 => self.decode_control(w, words),
            0x01 => {
                if self.enhanced() && w & 0xC0 == 0 {
                    one(Opcode::Movlb, vec![Operand::Imm6((w & 0x3F) as u8)])
                } else if !self.enhanced() && w & 0xF0 == 0 {
                    one(Opcode::Movlb, vec![Operand::Imm4((w & 0x0F) as u8)])
                } else {
                    Ok(None)
                }
            }
            0x02 | 0x03 => one(Opcode::Mulwf, vec![Operand::Banked(self.banked(w))]),
            0x04..=0x07 => one(Opcode::Decf, vec![self.file_dest(w)]),
            hi => {
                let opcode = match hi {
                    0x08 => Opcode::Sublw,
                    0x09 => Opcode::Iorlw,
                    0x0A => Opcode::Xorlw,
                    0x0B => Opcode::Andlw,
                    0x0C => Opcode::Retlw,
                    0x0D => Opcode::Mullw,
                    0x0E => Opcode::Movlw,
                    _ => Opcode::Addlw,
                };
                one(opcode, vec![Operand::Imm8((w & 0xFF) as u8)])
            }
        }
    }

    /// `0000 0000 xxxx xxxx`: control, table and far-move forms.
    fn decode_control(&self, w: u16, words: &Words<'_>) -> Decoded {
        let address = words.address;
        let one = |opcode: Opcode, operands: Vec<Operand>| {
            Ok(Some(Pic18Instruction::new(address, 2, opcode, operands)))
        };
        match w & 0xFF {
            0x00 => one(Opcode::Nop, vec![]),
            0x03 => one(Opcode::Sleep, vec![]),
            0x04 => one(Opcode::Clrwdt, vec![]),
            0x05 => one(Opcode::Push, vec![]),
            0x06 => one(Opcode::Pop, vec![]),
            0x07 => one(Opcode::Daw, vec![]),
            0x08..=0x0B => one(Opcode::Tblrd, vec![Operand::TableMode(TableMode::from_bits(w))]),
            0x0C..=0x0F => one(Opcode::Tblwt, vec![Operand::TableMode(TableMode::from_bits(w))]),
            0x10 | 0x11 => one(Opcode::Retfie, vec![Operand::Shadow(w & 1 != 0)]),
            0x12 | 0x13 => one(Opcode::Return, vec![Operand::Shadow(w & 1 != 0)]),
            0x14 if self.extended() => one(Opcode::Callw, vec![]),
            0xFF => one(Opcode::Reset, vec![]),
            0x02 if self.enhanced() && self.extended() => {
                let (Some(w2), Some(w3)) = (words.continuation(1, 3)?, words.continuation(2, 3)?)
                else {
                    return Ok(None);
                };
                let source = ((w2 >> 2) & 0x7F) as u8;
                let dest = ((w2 & 3) << 12) | (w3 & 0x0FFF);
                Ok(Some(Pic18Instruction::new(
                    address,
                    6,
                    Opcode::Movsfl,
                    vec![Operand::Fsr2Index(source), Operand::data_abs14(dest)],
                )))
            }
            0x60..=0x6F if self.enhanced() => {
                let (Some(w2), Some(w3)) = (words.continuation(1, 3)?, words.continuation(2, 3)?)
                else {
                    return Ok(None);
                };
                let source = ((w & 0x0F) << 10) | ((w2 >> 2) & 0x3FF);
                let dest = ((w2 & 3) << 12) | (w3 & 0x0FFF);
                Ok(Some(Pic18Instruction::new(
                    address,
                    6,
                    Opcode::Movffl,
                    vec![Operand::data_abs14(source), Operand::data_abs14(dest)],
                )))
            }
            _ => Ok(None),
        }
    }

    fn decode_branch(&self, w: u16, words: &Words<'_>) -> Decoded {
        let address = words.address;
        let one = |opcode: Opcode, operands: Vec<Operand>| {
            Ok(Some(Pic18Instruction::new(address, 2, opcode, operands)))
        };
        let two = |opcode: Opcode, operands: Vec<Operand>| {
            Ok(Some(Pic18Instruction::new(address, 4, opcode, operands)))
        };
        let rel8 = Operand::prog_rel8((w & 0xFF) as u8 as i8, address);
        match w >> 8 {
            0xE0 => one(Opcode::Bz, vec![rel8]),
            0xE1 => one(Opcode::Bnz, vec![rel8]),
            0xE2 => one(Opcode::Bc, vec![rel8]),
            0xE3 => one(Opcode::Bnc, vec![rel8]),
            0xE4 => one(Opcode::Bov, vec![rel8]),
            0xE5 => one(Opcode::Bnov, vec![rel8]),
            0xE6 => one(Opcode::Bn, vec![rel8]),
            0xE7 => one(Opcode::Bnn, vec![rel8]),
            0xE8 | 0xE9 if self.extended() => {
                let add = w >> 8 == 0xE8;
                let k = Operand::Imm6((w & 0x3F) as u8);
                match (w >> 6) & 3 {
                    3 => one(if add { Opcode::Addulnk } else { Opcode::Subulnk }, vec![k]),
                    n => one(
                        if add { Opcode::Addfsr } else { Opcode::Subfsr },
                        vec![Operand::FsrNum(n as u8), k],
                    ),
                }
            }
            0xEA if self.extended() => one(Opcode::Pushl, vec![Operand::Imm8((w & 0xFF) as u8)]),
            0xEB if self.extended() => {
                let Some(w2) = words.continuation(1, 2)? else {
                    return Ok(None);
                };
                let source = Operand::Fsr2Index((w & 0x7F) as u8);
                if w & 0x80 == 0 {
                    two(Opcode::Movsf, vec![source, Operand::data_abs12(w2)])
                } else {
                    two(Opcode::Movss, vec![source, Operand::Fsr2Index((w2 & 0x7F) as u8)])
                }
            }
            0xEC | 0xED => {
                let Some(w2) = words.continuation(1, 2)? else {
                    return Ok(None);
                };
                let target = (((w2 & 0x0FFF) as u32) << 8) | (w & 0xFF) as u32;
                two(
                    Opcode::Call,
                    vec![Operand::prog_abs(target), Operand::Shadow(w & 0x100 != 0)],
                )
            }
            0xEE => {
                let Some(w2) = words.continuation(1, 2)? else {
                    return Ok(None);
                };
                let fsr = (w >> 4) & 3;
                if w & 0xC0 != 0 || fsr == 3 {
                    return Ok(None);
                }
                let literal = if self.enhanced() {
                    if w2 & 0x0C00 != 0 {
                        return Ok(None);
                    }
                    Operand::Imm14(((w & 0x0F) << 10) | (w2 & 0x3FF))
                } else {
                    if w2 & 0x0F00 != 0 {
                        return Ok(None);
                    }
                    Operand::Imm12(((w & 0x0F) << 8) | (w2 & 0xFF))
                };
                two(Opcode::Lfsr, vec![Operand::FsrNum(fsr as u8), literal])
            }
            0xEF => {
                let Some(w2) = words.continuation(1, 2)? else {
                    return Ok(None);
                };
                let target = (((w2 & 0x0FFF) as u32) << 8) | (w & 0xFF) as u32;
                two(Opcode::Goto, vec![Operand::prog_abs(target)])
            }
            _ => Ok(None),
        }
    }
}

impl Decoder for Pic18Decoder {
    type Instr = Pic18Instruction;

    fn architecture(&self) -> Architecture {
        Architecture::Pic18
    }

    fn decode(&self, bytes: &[u8], address: Address) -> Result<Option<Pic18Instruction>, DecodeError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let words = Words { bytes, address };
        let w = words.get(0, 1)?;
        let one = |opcode: Opcode, operands: Vec<Operand>| {
            Ok(Some(Pic18Instruction::new(address, 2, opcode, operands)))
        };

        let decoded = match w >> 12 {
            0x0 => self.decode_word0(w, &words),
            0x1..=0x5 => {
                let opcode = match w >> 10 {
                    0x04 => Opcode::Iorwf,
                    0x05 => Opcode::Andwf,
                    0x06 => Opcode::Xorwf,
                    0x07 => Opcode::Comf,
                    0x08 => Opcode::Addwfc,
                    0x09 => Opcode::Addwf,
                    0x0A => Opcode::Incf,
                    0x0B => Opcode::Decfsz,
                    0x0C => Opcode::Rrcf,
                    0x0D => Opcode::Rlcf,
                    0x0E => Opcode::Swapf,
                    0x0F => Opcode::Incfsz,
                    0x10 => Opcode::Rrncf,
                    0x11 => Opcode::Rlncf,
                    0x12 => Opcode::Infsnz,
                    0x13 => Opcode::Dcfsnz,
                    0x14 => Opcode::Movf,
                    0x15 => Opcode::Subfwb,
                    0x16 => Opcode::Subwfb,
                    _ => Opcode::Subwf,
                };
                one(opcode, vec![self.file_dest(w)])
            }
            0x6 => {
                let opcode = match w >> 9 {
                    0x30 => Opcode::Cpfslt,
                    0x31 => Opcode::Cpfseq,
                    0x32 => Opcode::Cpfsgt,
                    0x33 => Opcode::Tstfsz,
                    0x34 => Opcode::Setf,
                    0x35 => Opcode::Clrf,
                    0x36 => Opcode::Negf,
                    _ => Opcode::Movwf,
                };
                one(opcode, vec![Operand::Banked(self.banked(w))])
            }
            0x7 => one(Opcode::Btg, vec![self.file_bit(w)]),
            0x8 => one(Opcode::Bsf, vec![self.file_bit(w)]),
            0x9 => one(Opcode::Bcf, vec![self.file_bit(w)]),
            0xA => one(Opcode::Btfss, vec![self.file_bit(w)]),
            0xB => one(Opcode::Btfsc, vec![self.file_bit(w)]),
            0xC => match words.continuation(1, 2)? {
                Some(w2) => Ok(Some(Pic18Instruction::new(
                    address,
                    4,
                    Opcode::Movff,
                    vec![Operand::data_abs12(w), Operand::data_abs12(w2)],
                ))),
                None => Ok(None),
            },
            0xD => {
                // sign-extend the 11-bit word offset
                let offset = (((w & 0x7FF) << 5) as i16) >> 5;
                let opcode = if w & 0x800 == 0 { Opcode::Bra } else { Opcode::Rcall };
                one(opcode, vec![Operand::prog_rel11(offset, address)])
            }
            0xE => self.decode_branch(w, &words),
            _ => one(Opcode::Nop, vec![]),
        }?;

        Ok(Some(decoded.unwrap_or_else(|| {
            log::trace!("invalid PIC18 word 0x{:04X} at 0x{:06X}", w, address);
            Pic18Instruction::invalid(address)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pic18::{devices, RegisterCatalog};
    use rstest::rstest;

    fn decode(decoder: &Pic18Decoder, words: &[u16], address: Address) -> Pic18Instruction {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        decoder.decode(&bytes, address).unwrap().unwrap()
    }

    fn traditional() -> Pic18Decoder {
        Pic18Decoder::new(Family::Traditional, ExecMode::Traditional)
    }

    fn extended() -> Pic18Decoder {
        Pic18Decoder::new(Family::Traditional, ExecMode::Extended)
    }

    fn enhanced() -> Pic18Decoder {
        Pic18Decoder::new(Family::Enhanced, ExecMode::Extended)
    }

    #[rstest]
    #[case(0x0000, Opcode::Nop)]
    #[case(0x0003, Opcode::Sleep)]
    #[case(0x0007, Opcode::Daw)]
    #[case(0x0009, Opcode::Tblrd)]
    #[case(0x000F, Opcode::Tblwt)]
    #[case(0x0012, Opcode::Return)]
    #[case(0x00FF, Opcode::Reset)]
    #[case(0x0E42, Opcode::Movlw)]
    #[case(0x0F01, Opcode::Addlw)]
    #[case(0x2642, Opcode::Addwf)]
    #[case(0x0642, Opcode::Decf)]
    #[case(0x5042, Opcode::Movf)]
    #[case(0x6A42, Opcode::Clrf)]
    #[case(0x6E42, Opcode::Movwf)]
    #[case(0x0242, Opcode::Mulwf)]
    #[case(0x6842, Opcode::Setf)]
    #[case(0x8042, Opcode::Bsf)]
    #[case(0xB042, Opcode::Btfsc)]
    #[case(0xE7FE, Opcode::Bnn)]
    #[case(0xD7FF, Opcode::Bra)]
    #[case(0xDFFF, Opcode::Rcall)]
    #[case(0xF123, Opcode::Nop)]
    #[case(0x0001, Opcode::Invalid)]
    #[case(0x0014, Opcode::Invalid)]
    #[case(0xE842, Opcode::Invalid)]
    fn test_one_word_opcodes(#[case] word: u16, #[case] opcode: Opcode) {
        let instr = decode(&traditional(), &[word], 0x100);
        assert_eq!(instr.opcode, opcode);
        assert_eq!(instr.length, 2);
    }

    #[test]
    fn test_file_operand_fields() {
        // ADDWF 0x42,W,BANKED
        let instr = decode(&traditional(), &[0x2542], 0);
        match &instr.operands[0] {
            Operand::BankedDest { addr, dest } => {
                assert_eq!(addr.offset, 0x42);
                assert!(!addr.access);
                assert_eq!(*dest, Destination::W);
            }
            other => panic!("unexpected operand {other:?}"),
        }
        // BTFSS 0x10,5,ACCESS
        let instr = decode(&traditional(), &[0xAA10], 0);
        assert!(matches!(instr.operands[0], Operand::BankedBit { bit: 5, .. }));
    }

    #[test]
    fn test_relative_branches() {
        let bra = decode(&traditional(), &[0xD7FF], 0x1000);
        assert_eq!(bra.operands[0].code_target(), Some(0x1000));
        let bz = decode(&traditional(), &[0xE0FD], 0x1000);
        assert_eq!(bz.operands[0].code_target(), Some(0x0FFC));
        let rcall = decode(&traditional(), &[0xD810], 0x1000);
        assert_eq!(rcall.operands[0].code_target(), Some(0x1022));
    }

    #[test]
    fn test_two_word_forms() {
        // GOTO 0x1000
        let goto = decode(&traditional(), &[0xEF00, 0xF008], 0);
        assert_eq!(goto.opcode, Opcode::Goto);
        assert_eq!(goto.length, 4);
        assert_eq!(goto.operands[0].code_target(), Some(0x1000));
        // CALL 0x000200, FAST
        let call = decode(&traditional(), &[0xED00, 0xF001], 0);
        assert_eq!(call.operands, vec![Operand::prog_abs(0x100), Operand::Shadow(true)]);
        // MOVFF 0x123, 0xFE8
        let movff = decode(&traditional(), &[0xC123, 0xFFE8], 0);
        assert_eq!(movff.operands, vec![Operand::DataAbs12(0x123), Operand::DataAbs12(0xFE8)]);
        // LFSR FSR1, 0x2AB
        let lfsr = decode(&traditional(), &[0xEE12, 0xF0AB], 0);
        assert_eq!(lfsr.operands, vec![Operand::FsrNum(1), Operand::Imm12(0x2AB)]);
    }

    #[test]
    fn test_bad_continuation_is_invalid() {
        let instr = decode(&traditional(), &[0xEF00, 0x0E08], 0);
        assert_eq!(instr.opcode, Opcode::Invalid);
        assert_eq!(instr.length, 2);
    }

    #[test]
    fn test_truncation() {
        let err = traditional().decode(&[0x00], 0x10).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { address: 0x10, needed: 2, available: 1 }));
        let err = traditional().decode(&[0x00, 0xEF], 0x10).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 4, available: 2, .. }));
        assert!(traditional().decode(&[], 0).unwrap().is_none());
    }

    #[test]
    fn test_extended_instructions() {
        let addfsr = decode(&extended(), &[0xE885], 0);
        assert_eq!(addfsr.operands, vec![Operand::FsrNum(2), Operand::Imm6(5)]);
        assert_eq!(decode(&extended(), &[0xE8C3], 0).opcode, Opcode::Addulnk);
        assert_eq!(decode(&extended(), &[0xE9C3], 0).opcode, Opcode::Subulnk);
        assert_eq!(decode(&extended(), &[0x0014], 0).opcode, Opcode::Callw);
        assert_eq!(decode(&extended(), &[0xEA42], 0).opcode, Opcode::Pushl);
        let movsf = decode(&extended(), &[0xEB05, 0xF123], 0);
        assert_eq!(movsf.operands, vec![Operand::Fsr2Index(5), Operand::DataAbs12(0x123)]);
        let movss = decode(&extended(), &[0xEB85, 0xF007], 0);
        assert_eq!(movss.operands, vec![Operand::Fsr2Index(5), Operand::Fsr2Index(7)]);
    }

    #[test]
    fn test_enhanced_forms() {
        // MOVFFL 0x1234 -> 0x3FE8
        let src: u16 = 0x1234;
        let dst: u16 = 0x3FE8;
        let w1 = 0x0060 | (src >> 10);
        let w2 = 0xF000 | ((src & 0x3FF) << 2) | (dst >> 12);
        let w3 = 0xF000 | (dst & 0xFFF);
        let movffl = decode(&enhanced(), &[w1, w2, w3], 0);
        assert_eq!(movffl.opcode, Opcode::Movffl);
        assert_eq!(movffl.length, 6);
        assert_eq!(movffl.operands, vec![Operand::DataAbs14(src), Operand::DataAbs14(dst)]);

        let movsfl = decode(&enhanced(), &[0x0002, 0xF000 | (0x11 << 2) | 3, 0xFFF9], 0);
        assert_eq!(movsfl.operands, vec![Operand::Fsr2Index(0x11), Operand::DataAbs14(0x3FF9)]);

        let movlb = decode(&enhanced(), &[0x013F], 0);
        assert_eq!(movlb.operands, vec![Operand::Imm6(0x3F)]);
        assert_eq!(decode(&traditional(), &[0x013F], 0).opcode, Opcode::Invalid);

        let lfsr = decode(&enhanced(), &[0xEE2F, 0xF3FF], 0);
        assert_eq!(lfsr.operands, vec![Operand::FsrNum(2), Operand::Imm14(0x3FFF)]);

        assert_eq!(decode(&traditional(), &[0x0060, 0xF000, 0xF000], 0).opcode, Opcode::Invalid);
    }

    #[test]
    fn test_data_directives() {
        let d = traditional();
        let db = d.decode_data(Opcode::Db, &[1, 2, 3], 0x10).unwrap().unwrap();
        assert_eq!(db.length, 3);
        let dw = d.decode_data(Opcode::Dw, &[0x34, 0x12, 0x78], 0x10).unwrap().unwrap();
        assert_eq!(dw.operands, vec![Operand::Data(PseudoData::Words(vec![0x1234]))]);
        assert_eq!(dw.length, 2);
        assert!(d.decode_data(Opcode::Dw, &[0x34], 0).is_err());
        assert!(d.decode_data(Opcode::Nop, &[0], 0).is_err());
        assert!(d.decode_data(Opcode::Db, &[], 0).unwrap().is_none());
    }

    #[test]
    fn test_config_directive_takes_one_fuse_byte() {
        let d = traditional();
        let cat = RegisterCatalog::load(Some(&devices::builtin("pic18f4620").unwrap())).unwrap();
        let config = d.decode_data(Opcode::Config, &[0x82, 0x1F], 0x300001).unwrap().unwrap();
        assert_eq!(config.length, 1);
        assert_eq!(
            config.operands,
            vec![Operand::Data(PseudoData::Config { address: 0x300001, value: 0x82 })]
        );
        assert_eq!(config.operands[0].render(&cat), "FOSC=HS, FCMEN=OFF, IESO=ON");

        let next = d.decode_data(Opcode::Config, &[0x1F], 0x300002).unwrap().unwrap();
        assert_eq!(next.operands[0].render(&cat), "PWRT=OFF, BOREN=SBORDIS, BORV=0x3");
        assert!(d.decode_data(Opcode::Config, &[], 0x300003).unwrap().is_none());
    }
}
