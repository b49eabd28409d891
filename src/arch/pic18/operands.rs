//! PIC18 operand model and assembly rendering.
//!
//! Operands are immutable values. Code targets are computed when the operand
//! is built. Data operands keep their raw encoded fields and are resolved
//! against the device's [`DataMemory`](super::memory::DataMemory) on use.
//! Rendering only reads the [`RegisterCatalog`].

use std::fmt::Write;

use super::memory::{absolute_target, relative_target, DataLocation};
use super::registers::{shadows, RegisterCatalog};
use super::ExecMode;
use crate::arch::OperandAccess;
use crate::ir::{DataType, Identifier};
use crate::Address;

/// The file-register field shared by banked, bit and destination forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankedAddress {
    pub offset: u8,
    /// `a = 0`: access bank rather than BSR-selected bank.
    pub access: bool,
    pub mode: ExecMode,
}

impl BankedAddress {
    /// Build from the raw `f` and `a` instruction fields.
    pub fn new(mode: ExecMode, offset: u8, a: u16) -> Self {
        Self {
            offset,
            access: a == 0,
            mode,
        }
    }

    pub fn location(&self, catalog: &RegisterCatalog) -> DataLocation {
        catalog.memory().resolve(self.offset, self.access, self.mode)
    }

    pub fn is_indexed(&self, catalog: &RegisterCatalog) -> bool {
        matches!(self.location(catalog), DataLocation::Indexed(_))
    }
}

/// Where a byte operation stores its result (`d` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    W,
    F,
}

impl Destination {
    pub fn from_bit(d: u16) -> Self {
        if d == 0 {
            Destination::W
        } else {
            Destination::F
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Destination::W => ",W",
            Destination::F => ",F",
        }
    }
}

/// TBLRD/TBLWT pointer update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    Plain,
    PostIncrement,
    PostDecrement,
    PreIncrement,
}

impl TableMode {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => TableMode::Plain,
            1 => TableMode::PostIncrement,
            2 => TableMode::PostDecrement,
            _ => TableMode::PreIncrement,
        }
    }

    fn text(self) -> &'static str {
        match self {
            TableMode::Plain => "*",
            TableMode::PostIncrement => "*+",
            TableMode::PostDecrement => "*-",
            TableMode::PreIncrement => "+*",
        }
    }
}

/// A storage location a PIC18 operand can touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pic18Storage {
    /// A named register: a special function register, a core register pair
    /// or a fast-return shadow.
    Register(Identifier),
    /// Data memory with no register name on this device.
    Data(DataLocation),
}

impl Pic18Storage {
    /// A data location, named when it resolves to a known register.
    fn data(catalog: &RegisterCatalog, location: DataLocation) -> Self {
        match location {
            DataLocation::Absolute(a) => match catalog.lookup(a, 8) {
                Some(sfr) => Pic18Storage::Register(sfr.identifier()),
                None => Pic18Storage::Data(location),
            },
            other => Pic18Storage::Data(other),
        }
    }
}

/// Literal payload of a data directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoData {
    Bytes(Vec<u8>),
    Words(Vec<u16>),
    Eeprom(Vec<u8>),
    Ascii(Vec<u8>),
    IdLocs { address: Address, value: u16 },
    /// One fuse byte, rendered through the device's config word definitions.
    Config { address: Address, value: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Imm4(u8),
    Imm6(u8),
    Imm8(u8),
    /// LFSR literal on traditional devices.
    Imm12(u16),
    /// LFSR literal on enhanced devices.
    Imm14(u16),
    /// 7-bit offset from FSR2 (MOVSF, MOVSFL, MOVSS).
    Fsr2Index(u8),
    /// `s` bit of CALL, RETURN, RETFIE.
    Shadow(bool),
    ProgRel8 { offset: i8, target: Address },
    ProgRel11 { offset: i16, target: Address },
    ProgAbs { target: Address },
    FsrNum(u8),
    TableMode(TableMode),
    DataAbs12(u16),
    DataAbs14(u16),
    Banked(BankedAddress),
    BankedBit { addr: BankedAddress, bit: u8 },
    BankedDest { addr: BankedAddress, dest: Destination },
    Data(PseudoData),
}

impl Operand {
    pub fn prog_rel8(offset: i8, instr_address: Address) -> Self {
        Operand::ProgRel8 {
            offset,
            target: relative_target(instr_address, offset as i32),
        }
    }

    pub fn prog_rel11(offset: i16, instr_address: Address) -> Self {
        Operand::ProgRel11 {
            offset,
            target: relative_target(instr_address, offset as i32),
        }
    }

    pub fn prog_abs(word_address: u32) -> Self {
        Operand::ProgAbs {
            target: absolute_target(word_address),
        }
    }

    pub fn data_abs12(address: u16) -> Self {
        Operand::DataAbs12(address & 0x0FFF)
    }

    pub fn data_abs14(address: u16) -> Self {
        Operand::DataAbs14(address & 0x3FFF)
    }

    /// Data type of the value the operand denotes.
    pub fn data_type(&self) -> DataType {
        match self {
            Operand::Imm4(_) | Operand::Imm6(_) | Operand::Imm8(_) => DataType::Byte,
            Operand::Imm12(_) | Operand::Imm14(_) => DataType::UInt16,
            Operand::Fsr2Index(_) | Operand::FsrNum(_) | Operand::TableMode(_) => DataType::Byte,
            Operand::Shadow(_) => DataType::Bool,
            Operand::ProgRel8 { .. } | Operand::ProgRel11 { .. } | Operand::ProgAbs { .. } => {
                DataType::Ptr32
            }
            Operand::DataAbs12(_) | Operand::DataAbs14(_) => DataType::Ptr16,
            Operand::Banked(_) | Operand::BankedBit { .. } | Operand::BankedDest { .. } => {
                DataType::Byte
            }
            Operand::Data(PseudoData::Words(_)) | Operand::Data(PseudoData::IdLocs { .. }) => {
                DataType::Word16
            }
            Operand::Data(_) => DataType::Byte,
        }
    }

    /// Code address of a branch, call or goto operand.
    pub fn code_target(&self) -> Option<Address> {
        match self {
            Operand::ProgRel8 { target, .. }
            | Operand::ProgRel11 { target, .. }
            | Operand::ProgAbs { target } => Some(*target),
            _ => None,
        }
    }

    /// Storage the operand touches on `catalog`'s device. File operands are
    /// resolved through [`DataMemory::resolve`](super::memory::DataMemory::resolve):
    /// banked operands read BSR and FSR2-indexed operands read FSR2.
    pub fn accesses(&self, catalog: &RegisterCatalog) -> OperandAccess<Pic18Storage> {
        let core = catalog.core();
        let reg = |id: &Identifier| Pic18Storage::Register(id.clone());
        let mut access = OperandAccess::default();
        match self {
            Operand::Imm4(_)
            | Operand::Imm6(_)
            | Operand::Imm8(_)
            | Operand::Imm12(_)
            | Operand::Imm14(_)
            | Operand::Shadow(false)
            | Operand::ProgRel8 { .. }
            | Operand::ProgRel11 { .. }
            | Operand::ProgAbs { .. }
            | Operand::Data(_) => {}
            Operand::Shadow(true) => {
                access.target.extend(shadows().into_iter().map(Pic18Storage::Register));
            }
            Operand::Fsr2Index(k) => {
                access.reads.push(reg(&core.fsr[2]));
                access.target.push(Pic18Storage::Data(DataLocation::Indexed(*k)));
            }
            Operand::FsrNum(n) => {
                if let Some(fsr) = core.fsr.get(*n as usize) {
                    access.target.push(reg(fsr));
                }
            }
            Operand::TableMode(mode) => {
                access.reads.push(reg(&core.tblptr));
                access.target.push(reg(&core.tablat));
                if *mode != TableMode::Plain {
                    access.writes.push(reg(&core.tblptr));
                }
            }
            Operand::DataAbs12(a) | Operand::DataAbs14(a) => {
                let location = DataLocation::Absolute(*a);
                access.target.push(Pic18Storage::data(catalog, location));
            }
            Operand::Banked(addr) | Operand::BankedBit { addr, .. } => {
                file_access(catalog, addr, &mut access);
            }
            Operand::BankedDest { addr, dest } => {
                let file = file_access(catalog, addr, &mut access);
                access.reads.push(file.clone());
                access.writes.push(match dest {
                    Destination::W => reg(&core.wreg),
                    Destination::F => file,
                });
            }
        }
        access
    }

    /// Assembly text, preferring register and bit names from `catalog`.
    pub fn render(&self, catalog: &RegisterCatalog) -> String {
        match self {
            Operand::Imm4(v) | Operand::Imm6(v) | Operand::Imm8(v) => format!("0x{:02X}", v),
            Operand::Imm12(v) | Operand::Imm14(v) => match catalog.lookup(*v, 8) {
                Some(sfr) => sfr.name.clone(),
                None => format!("0x{:04X}", v),
            },
            Operand::Fsr2Index(k) => format!("[0x{:02X}]", k),
            Operand::Shadow(true) => "FAST".to_string(),
            Operand::Shadow(false) => String::new(),
            Operand::ProgRel8 { target, .. }
            | Operand::ProgRel11 { target, .. }
            | Operand::ProgAbs { target } => format!("0x{:06X}", target),
            Operand::FsrNum(n) => format!("FSR{}", n),
            Operand::TableMode(mode) => mode.text().to_string(),
            Operand::DataAbs12(a) => match catalog.lookup(*a, 8) {
                Some(sfr) => sfr.name.clone(),
                None => format!("0x{:03X}", a),
            },
            Operand::DataAbs14(a) => match catalog.lookup(*a, 8) {
                Some(sfr) => sfr.name.clone(),
                None => format!("0x{:04X}", a),
            },
            Operand::Banked(addr) => render_banked(catalog, addr, "", |_| String::new()),
            Operand::BankedBit { addr, bit } => {
                let bit = *bit;
                render_banked(catalog, addr, &format!(",{}", bit), |sfr_address| {
                    match catalog.peek_bit_field(sfr_address, bit, 1) {
                        Some(field) => format!(",{}", field.name),
                        None => format!(",{}", bit),
                    }
                })
            }
            Operand::BankedDest { addr, dest } => {
                render_banked(catalog, addr, dest.suffix(), |_| dest.suffix().to_string())
            }
            Operand::Data(data) => render_data(catalog, data),
        }
    }
}

/// Record the register that selects a file operand and the operand itself;
/// returns the operand's storage.
fn file_access(
    catalog: &RegisterCatalog,
    addr: &BankedAddress,
    access: &mut OperandAccess<Pic18Storage>,
) -> Pic18Storage {
    let core = catalog.core();
    let location = addr.location(catalog);
    match location {
        DataLocation::Indexed(_) => access.reads.push(Pic18Storage::Register(core.fsr[2].clone())),
        DataLocation::Banked(_) => access.reads.push(Pic18Storage::Register(core.bsr.clone())),
        DataLocation::Absolute(_) => {}
    }
    let storage = Pic18Storage::data(catalog, location);
    access.target.push(storage.clone());
    storage
}

/// Shared layout of the three banked forms: `[k]<tail>`, `k<tail>,BANKED`,
/// `NAME<named tail>,ACCESS` or `k<tail>,ACCESS`.
fn render_banked(
    catalog: &RegisterCatalog,
    addr: &BankedAddress,
    tail: &str,
    named_tail: impl Fn(u16) -> String,
) -> String {
    match addr.location(catalog) {
        DataLocation::Indexed(k) => format!("[0x{:02X}]{}", k, tail),
        DataLocation::Banked(k) => format!("0x{:02X}{},BANKED", k, tail),
        DataLocation::Absolute(a) => match catalog.lookup(a, 8) {
            Some(sfr) => format!("{}{},ACCESS", sfr.name, named_tail(a)),
            None => format!("0x{:02X}{},ACCESS", addr.offset, tail),
        },
    }
}

fn render_data(catalog: &RegisterCatalog, data: &PseudoData) -> String {
    let mut out = String::new();
    match data {
        PseudoData::Bytes(v) | PseudoData::Eeprom(v) | PseudoData::Ascii(v) => {
            for (i, b) in v.iter().enumerate() {
                let sep = if i == 0 { "" } else { "," };
                let _ = write!(out, "{}0x{:02X}", sep, b);
            }
        }
        PseudoData::Words(v) => {
            for (i, w) in v.iter().enumerate() {
                let sep = if i == 0 { "" } else { "," };
                let _ = write!(out, "{}0x{:04X}", sep, w);
            }
        }
        PseudoData::IdLocs { address, value } => {
            let _ = write!(out, "0x{:06X}, 0x{:03X}", address, value);
        }
        PseudoData::Config { address, value } => out = catalog.render_config(*address, *value),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pic18::devices;
    use rstest::rstest;

    fn catalog(device: &str) -> RegisterCatalog {
        RegisterCatalog::load(Some(&devices::builtin(device).unwrap())).unwrap()
    }

    fn access(offset: u8, mode: ExecMode) -> BankedAddress {
        BankedAddress::new(mode, offset, 0)
    }

    fn banked(offset: u8) -> BankedAddress {
        BankedAddress::new(ExecMode::Traditional, offset, 1)
    }

    #[test]
    fn test_code_targets() {
        assert_eq!(Operand::prog_rel8(-3, 0x1000).code_target(), Some(0x0FFC));
        assert_eq!(Operand::prog_rel11(0x10, 0x1000).code_target(), Some(0x1022));
        let abs = Operand::prog_abs(0x0800);
        assert_eq!(abs.code_target(), Some(0x1000));
        assert_eq!(abs.render(&catalog("pic18f4620")), "0x001000");
    }

    #[rstest]
    #[case(Operand::Imm4(0x5), "0x05")]
    #[case(Operand::Imm8(0xAB), "0xAB")]
    #[case(Operand::Imm12(0x123), "0x0123")]
    #[case(Operand::Imm12(0xFD8), "STATUS")]
    #[case(Operand::Fsr2Index(0x12), "[0x12]")]
    #[case(Operand::Shadow(true), "FAST")]
    #[case(Operand::Shadow(false), "")]
    #[case(Operand::FsrNum(2), "FSR2")]
    #[case(Operand::TableMode(TableMode::PreIncrement), "+*")]
    #[case(Operand::TableMode(TableMode::PostDecrement), "*-")]
    #[case(Operand::data_abs12(0x123), "0x123")]
    #[case(Operand::data_abs12(0xFE8), "WREG")]
    #[case(Operand::Data(PseudoData::Bytes(vec![1, 0xFF])), "0x01,0xFF")]
    #[case(Operand::Data(PseudoData::Words(vec![0x1234, 0x5])), "0x1234,0x0005")]
    #[case(Operand::Data(PseudoData::IdLocs { address: 0x200000, value: 0xF }), "0x200000, 0x00F")]
    #[case(Operand::Data(PseudoData::Config { address: 0x300006, value: 0x81 }), "STVREN=ON, LVP=OFF, XINST=OFF")]
    #[case(Operand::Data(PseudoData::Config { address: 0x300008, value: 0x0F }), "0x300008=0x0F")]
    fn test_render_simple(#[case] operand: Operand, #[case] expected: &str) {
        assert_eq!(operand.render(&catalog("pic18f4620")), expected);
    }

    #[rstest]
    #[case(Operand::Banked(access(0xD8, ExecMode::Traditional)), "STATUS,ACCESS")]
    #[case(Operand::Banked(access(0x20, ExecMode::Traditional)), "0x20,ACCESS")]
    #[case(Operand::Banked(access(0x20, ExecMode::Extended)), "[0x20]")]
    #[case(Operand::Banked(banked(0xD8)), "0xD8,BANKED")]
    #[case(Operand::BankedBit { addr: access(0xD8, ExecMode::Traditional), bit: 2 }, "STATUS,Z,ACCESS")]
    #[case(Operand::BankedBit { addr: access(0xD8, ExecMode::Traditional), bit: 6 }, "STATUS,6,ACCESS")]
    #[case(Operand::BankedBit { addr: access(0x10, ExecMode::Extended), bit: 3 }, "[0x10],3")]
    #[case(Operand::BankedBit { addr: banked(0x10), bit: 3 }, "0x10,3,BANKED")]
    #[case(Operand::BankedBit { addr: access(0x10, ExecMode::Traditional), bit: 3 }, "0x10,3,ACCESS")]
    #[case(Operand::BankedDest { addr: access(0xE8, ExecMode::Traditional), dest: Destination::F }, "WREG,F,ACCESS")]
    #[case(Operand::BankedDest { addr: access(0x05, ExecMode::Extended), dest: Destination::W }, "[0x05],W")]
    #[case(Operand::BankedDest { addr: banked(0x05), dest: Destination::W }, "0x05,W,BANKED")]
    #[case(Operand::BankedDest { addr: access(0x05, ExecMode::Traditional), dest: Destination::F }, "0x05,F,ACCESS")]
    fn test_render_banked(#[case] operand: Operand, #[case] expected: &str) {
        let cat = catalog("pic18f4620");
        assert_eq!(operand.render(&cat), expected);
        assert_eq!(operand.render(&cat), expected);
    }

    fn register(cat: &RegisterCatalog, name: &str) -> Pic18Storage {
        Pic18Storage::Register(cat.by_name(name).unwrap().identifier())
    }

    #[test]
    fn test_banked_operand_reads_bsr() {
        let cat = catalog("pic18f4620");
        let acc = Operand::Banked(banked(0x20)).accesses(&cat);
        assert_eq!(acc.reads, vec![register(&cat, "BSR")]);
        assert_eq!(acc.target, vec![Pic18Storage::Data(DataLocation::Banked(0x20))]);
        assert!(acc.writes.is_empty());
    }

    #[test]
    fn test_access_bank_operands_resolve_to_registers() {
        let cat = catalog("pic18f4620");
        let acc = Operand::Banked(access(0xD8, ExecMode::Traditional)).accesses(&cat);
        assert!(acc.reads.is_empty());
        assert_eq!(acc.target, vec![register(&cat, "STATUS")]);

        let acc = Operand::Banked(access(0x20, ExecMode::Traditional)).accesses(&cat);
        assert_eq!(acc.target, vec![Pic18Storage::Data(DataLocation::Absolute(0x020))]);

        let enhanced = catalog("pic18f46k42");
        let acc = Operand::BankedBit { addr: access(0xD8, ExecMode::Traditional), bit: 2 }.accesses(&enhanced);
        assert_eq!(acc.target, vec![register(&enhanced, "STATUS")]);
    }

    #[test]
    fn test_fsr2_indexed_operands_read_fsr2() {
        let cat = catalog("pic18f4620");
        let indexed = vec![Pic18Storage::Data(DataLocation::Indexed(0x20))];
        let acc = Operand::Banked(access(0x20, ExecMode::Extended)).accesses(&cat);
        assert_eq!(acc.reads, vec![register(&cat, "FSR2")]);
        assert_eq!(acc.target, indexed);

        let acc = Operand::Fsr2Index(0x20).accesses(&cat);
        assert_eq!(acc.reads, vec![register(&cat, "FSR2")]);
        assert_eq!(acc.target, indexed);

        // Above the index limit extended mode still uses the access bank.
        let acc = Operand::Banked(access(0xE8, ExecMode::Extended)).accesses(&cat);
        assert_eq!(acc.target, vec![register(&cat, "WREG")]);
    }

    #[test]
    fn test_destination_bit_selects_written_storage() {
        let cat = catalog("pic18f4620");
        let file = Pic18Storage::Data(DataLocation::Banked(0x05));
        let to_w = Operand::BankedDest { addr: banked(0x05), dest: Destination::W }.accesses(&cat);
        assert_eq!(to_w.reads, vec![register(&cat, "BSR"), file.clone()]);
        assert_eq!(to_w.writes, vec![register(&cat, "WREG")]);

        let to_f = Operand::BankedDest { addr: banked(0x05), dest: Destination::F }.accesses(&cat);
        assert_eq!(to_f.writes, vec![file]);
    }

    #[test]
    fn test_non_data_operands() {
        let cat = catalog("pic18f4620");
        assert!(Operand::Imm8(1).accesses(&cat).is_empty());
        assert!(Operand::prog_abs(0x800).accesses(&cat).is_empty());
        assert!(Operand::Shadow(false).accesses(&cat).is_empty());
        assert_eq!(Operand::Shadow(true).accesses(&cat).target.len(), 3);
        assert_eq!(Operand::FsrNum(1).accesses(&cat).target, vec![register(&cat, "FSR1")]);
        assert_eq!(Operand::data_abs12(0xFE8).accesses(&cat).target, vec![register(&cat, "WREG")]);

        let table = Operand::TableMode(TableMode::PostIncrement).accesses(&cat);
        assert_eq!(table.reads, vec![register(&cat, "TBLPTR")]);
        assert_eq!(table.target, vec![register(&cat, "TABLAT")]);
        assert_eq!(table.writes, vec![register(&cat, "TBLPTR")]);
        assert!(Operand::TableMode(TableMode::Plain).accesses(&cat).writes.is_empty());
    }

    #[test]
    fn test_render_enhanced_device() {
        let cat = catalog("pic18f46k42");
        assert_eq!(Operand::Banked(access(0xD8, ExecMode::Traditional)).render(&cat), "STATUS,ACCESS");
        assert_eq!(Operand::Banked(access(0x70, ExecMode::Traditional)).render(&cat), "0x70,ACCESS");
        assert_eq!(Operand::data_abs14(0x3FE8).render(&cat), "WREG");
        assert_eq!(Operand::data_abs14(0x1234).render(&cat), "0x1234");
    }
}
