//! The PIC18 register catalog: special function registers by name and by
//! data address, their bit-fields, and far-move write restrictions.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use super::config::{ConfigWordConfig, DeviceConfig, Family};
use super::memory::DataMemory;
use crate::ir::{DataType, Identifier};
use crate::{Address, LiftError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    pub name: String,
    pub bit: u8,
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    pub name: String,
    pub address: u16,
    pub width: u32,
    pub bit_fields: Vec<BitField>,
}

impl RegisterEntry {
    pub fn data_type(&self) -> DataType {
        DataType::word(self.width)
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::register(self.name.as_str(), self.data_type(), self.address as u32)
    }
}

/// Indirect-addressing register kinds; each is a window onto `[FSRn]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indirect {
    Indf,
    PostInc,
    PostDec,
    PreInc,
    PlusW,
}

impl Indirect {
    /// Parse `INDF0`, `POSTINC1`, `PLUSW2`... into kind and FSR number.
    fn parse(name: &str) -> Option<(Indirect, u8)> {
        const PREFIXES: [(&str, Indirect); 5] = [
            ("INDF", Indirect::Indf),
            ("POSTINC", Indirect::PostInc),
            ("POSTDEC", Indirect::PostDec),
            ("PREINC", Indirect::PreInc),
            ("PLUSW", Indirect::PlusW),
        ];
        PREFIXES.iter().find_map(|(prefix, kind)| {
            let n = name.strip_prefix(prefix)?;
            match n {
                "0" | "1" | "2" => n.parse().ok().map(|n| (*kind, n)),
                _ => None,
            }
        })
    }
}

/// Identifiers for the registers the rewriter refers to directly.
#[derive(Debug, Clone)]
pub struct CoreRegisters {
    pub wreg: Identifier,
    pub status: Identifier,
    pub bsr: Identifier,
    pub fsr: [Identifier; 3],
    pub prod: Identifier,
    pub tblptr: Identifier,
    pub tablat: Identifier,
    pub stkptr: Identifier,
    pub tos: Identifier,
    pub pcl: Identifier,
    pub pclath: Identifier,
    pub pclatu: Identifier,
}

/// Fast-return shadow registers live outside data memory.
const SHADOW_BASE: u32 = 0x1_0000;

/// Shadow copies of WREG, STATUS and BSR used by the FAST forms of CALL,
/// RETURN and RETFIE.
pub fn shadows() -> [Identifier; 3] {
    [
        Identifier::register("WREG_SHAD", DataType::Byte, SHADOW_BASE),
        Identifier::register("STATUS_SHAD", DataType::Byte, SHADOW_BASE + 1),
        Identifier::register("BSR_SHAD", DataType::Byte, SHADOW_BASE + 2),
    ]
}

const CORE_NAMES: [&str; 14] = [
    "WREG", "STATUS", "BSR", "FSR0", "FSR1", "FSR2", "PROD", "TBLPTR", "TABLAT", "STKPTR", "TOS",
    "PCL", "PCLATH", "PCLATU",
];

/// Read-only register symbol table for one device.
#[derive(Debug)]
pub struct RegisterCatalog {
    device: String,
    memory: DataMemory,
    entries: Vec<RegisterEntry>,
    by_address: HashMap<(u16, u32), usize>,
    by_name: HashMap<String, usize>,
    forbidden: HashSet<u16>,
    core: CoreRegisters,
    config_words: Vec<ConfigWordConfig>,
}

impl RegisterCatalog {
    /// Build the catalog from a device definition.
    ///
    /// A missing definition is [`LiftError::MissingDeviceConfig`]; duplicate
    /// names, out-of-range addresses or bit-fields, missing core registers
    /// and unknown forbidden destinations are [`LiftError::DeviceConfig`].
    pub fn load(config: Option<&DeviceConfig>) -> Result<Self, LiftError> {
        let config = config.ok_or(LiftError::MissingDeviceConfig)?;
        let memory = DataMemory::new(
            config.family,
            to_u16(config.access_split, "access_split")?,
            to_u16(config.sfr_window, "sfr_window")?,
        );
        let limit = 1u32 << config.data_address_bits.min(16);

        let mut entries = Vec::with_capacity(config.registers.len());
        let mut by_address = HashMap::new();
        let mut by_name = HashMap::new();
        for reg in &config.registers {
            if reg.address >= limit {
                return Err(LiftError::DeviceConfig(format!(
                    "register {} at 0x{:X} is outside data memory",
                    reg.name, reg.address
                )));
            }
            for field in &reg.bit_fields {
                if field.width == 0 || u32::from(field.bit) + u32::from(field.width) > reg.width {
                    return Err(LiftError::DeviceConfig(format!(
                        "bit-field {}.{} does not fit in {} bits",
                        reg.name, field.name, reg.width
                    )));
                }
            }
            let index = entries.len();
            if by_name.insert(reg.name.clone(), index).is_some() {
                return Err(LiftError::DeviceConfig(format!(
                    "register {} is defined twice",
                    reg.name
                )));
            }
            // The first name at an address wins for reverse lookup.
            by_address.entry((reg.address as u16, reg.width)).or_insert(index);
            entries.push(RegisterEntry {
                name: reg.name.clone(),
                address: reg.address as u16,
                width: reg.width,
                bit_fields: reg
                    .bit_fields
                    .iter()
                    .map(|f| BitField {
                        name: f.name.clone(),
                        bit: f.bit,
                        width: f.width,
                    })
                    .collect(),
            });
        }

        let core_id = |name: &str| -> Result<Identifier, LiftError> {
            by_name
                .get(name)
                .map(|&i| entries[i].identifier())
                .ok_or_else(|| LiftError::DeviceConfig(format!("core register {} is missing", name)))
        };
        for name in CORE_NAMES {
            core_id(name)?;
        }
        let core = CoreRegisters {
            wreg: core_id("WREG")?,
            status: core_id("STATUS")?,
            bsr: core_id("BSR")?,
            fsr: [core_id("FSR0")?, core_id("FSR1")?, core_id("FSR2")?],
            prod: core_id("PROD")?,
            tblptr: core_id("TBLPTR")?,
            tablat: core_id("TABLAT")?,
            stkptr: core_id("STKPTR")?,
            tos: core_id("TOS")?,
            pcl: core_id("PCL")?,
            pclath: core_id("PCLATH")?,
            pclatu: core_id("PCLATU")?,
        };

        let mut forbidden = HashSet::new();
        for name in &config.forbidden_far_destinations {
            let entry = by_name.get(name.as_str()).map(|&i| &entries[i]).ok_or_else(|| {
                LiftError::DeviceConfig(format!("forbidden destination {} is not a register", name))
            })?;
            forbidden.insert(entry.address);
        }

        for word in &config.config_words {
            for field in &word.fields {
                if field.width == 0 || u32::from(field.bit) + u32::from(field.width) > 8 {
                    return Err(LiftError::DeviceConfig(format!(
                        "config field {}.{} does not fit in a byte",
                        word.name, field.name
                    )));
                }
            }
        }

        log::debug!(
            "loaded {} registers for {} ({} forbidden far-move destinations)",
            entries.len(),
            config.name,
            forbidden.len()
        );
        Ok(Self {
            device: config.name.clone(),
            memory,
            entries,
            by_address,
            by_name,
            forbidden,
            core,
            config_words: config.config_words.clone(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn family(&self) -> Family {
        self.memory.family()
    }

    pub fn memory(&self) -> &DataMemory {
        &self.memory
    }

    pub fn core(&self) -> &CoreRegisters {
        &self.core
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The register of `width` bits at data address `address`.
    pub fn lookup(&self, address: u16, width: u32) -> Option<&RegisterEntry> {
        self.by_address
            .get(&(address, width))
            .map(|&i| &self.entries[i])
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisterEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// The bit-field of `width` bits starting at `bit` in the byte register at `address`.
    pub fn peek_bit_field(&self, address: u16, bit: u8, width: u8) -> Option<&BitField> {
        self.lookup(address, 8)?
            .bit_fields
            .iter()
            .find(|f| f.bit == bit && f.width == width)
    }

    /// The first register carrying a bit-field called `name`.
    pub fn bit_field_by_name(&self, name: &str) -> Option<(&RegisterEntry, &BitField)> {
        self.entries
            .iter()
            .find_map(|reg| reg.bit_fields.iter().find(|f| f.name == name).map(|f| (reg, f)))
    }

    /// Whether far moves may not write `address`.
    pub fn is_forbidden_destination(&self, address: u16) -> bool {
        self.forbidden.contains(&address)
    }

    /// If `address` is an indirect-addressing register, its kind and FSR number.
    pub fn indirect(&self, address: u16) -> Option<(Indirect, u8)> {
        Indirect::parse(&self.lookup(address, 8)?.name)
    }
}

impl RegisterCatalog {
    /// Text of a CONFIG directive setting the fuse byte at `address` to
    /// `value`: `FOSC=HS, IESO=OFF` for a described byte, `0x300001=0x26`
    /// otherwise. Fields without a named setting show their raw value.
    pub fn render_config(&self, address: Address, value: u8) -> String {
        let word = self
            .config_words
            .iter()
            .find(|w| Address::from(w.address) == address && !w.fields.is_empty());
        let Some(word) = word else {
            return format!("0x{:06X}=0x{:02X}", address, value);
        };
        let mut out = String::new();
        for (i, field) in word.fields.iter().enumerate() {
            let mask = ((1u16 << field.width) - 1) as u8;
            let bits = (value >> field.bit) & mask;
            let sep = if i == 0 { "" } else { ", " };
            match field.settings.iter().find(|s| s.value == bits) {
                Some(setting) => {
                    let _ = write!(out, "{}{}={}", sep, field.name, setting.name);
                }
                None => {
                    let _ = write!(out, "{}{}=0x{:X}", sep, field.name, bits);
                }
            }
        }
        out
    }
}

fn to_u16(value: u32, what: &str) -> Result<u16, LiftError> {
    u16::try_from(value)
        .map_err(|_| LiftError::DeviceConfig(format!("{} 0x{:X} is out of range", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pic18::devices;
    use rstest::rstest;

    fn catalog() -> RegisterCatalog {
        RegisterCatalog::load(Some(&devices::builtin("pic18f4620").unwrap())).unwrap()
    }

    #[test]
    fn test_missing_config_is_fatal() {
        assert!(matches!(
            RegisterCatalog::load(None),
            Err(LiftError::MissingDeviceConfig)
        ));
    }

    #[test]
    fn test_lookup_by_address_and_width() {
        let cat = catalog();
        assert_eq!(cat.lookup(0xFD8, 8).unwrap().name, "STATUS");
        assert_eq!(cat.lookup(0xFE9, 8).unwrap().name, "FSR0L");
        assert_eq!(cat.lookup(0xFE9, 16).unwrap().name, "FSR0");
        assert!(cat.lookup(0x020, 8).is_none());
        assert_eq!(cat.by_name("WREG").unwrap().address, 0xFE8);
    }

    #[test]
    fn test_bit_fields() {
        let cat = catalog();
        let (intcon, gie) = cat.bit_field_by_name("GIE").unwrap();
        assert_eq!((intcon.name.as_str(), gie.bit), ("INTCON", 7));
        assert!(cat.bit_field_by_name("NOPE").is_none());
        assert_eq!(cat.peek_bit_field(0xFD8, 2, 1).unwrap().name, "Z");
        assert!(cat.peek_bit_field(0xFD8, 7, 1).is_none());
        assert_eq!(cat.peek_bit_field(0xFFC, 0, 5).unwrap().name, "SP");
    }

    #[rstest]
    #[case(0xFF9, true)]
    #[case(0xFFD, true)]
    #[case(0xFFE, true)]
    #[case(0xFFF, true)]
    #[case(0xFFA, false)]
    #[case(0xFE8, false)]
    #[case(0x010, false)]
    fn test_forbidden_destinations(#[case] address: u16, #[case] forbidden: bool) {
        assert_eq!(catalog().is_forbidden_destination(address), forbidden);
    }

    #[test]
    fn test_forbidden_set_follows_config() {
        let mut config = devices::builtin("pic18f4620").unwrap();
        config.forbidden_far_destinations = vec!["PCLATH".to_string()];
        let cat = RegisterCatalog::load(Some(&config)).unwrap();
        assert!(cat.is_forbidden_destination(0xFFA));
        assert!(!cat.is_forbidden_destination(0xFF9));

        config.forbidden_far_destinations = vec!["NOPE".to_string()];
        assert!(RegisterCatalog::load(Some(&config)).is_err());
    }

    #[test]
    fn test_indirect_registers() {
        let cat = catalog();
        assert_eq!(cat.indirect(0xFEE), Some((Indirect::PostInc, 0)));
        assert_eq!(cat.indirect(0xFDB), Some((Indirect::PlusW, 2)));
        assert_eq!(cat.indirect(0xFD8), None);
    }

    #[test]
    fn test_invalid_definitions() {
        let mut config = devices::builtin("pic18f4620").unwrap();
        config.registers.retain(|r| r.name != "BSR");
        assert!(matches!(
            RegisterCatalog::load(Some(&config)),
            Err(LiftError::DeviceConfig(msg)) if msg.contains("BSR")
        ));

        let mut config = devices::builtin("pic18f4620").unwrap();
        let dup = config.registers[0].clone();
        config.registers.push(dup);
        assert!(RegisterCatalog::load(Some(&config)).is_err());

        let mut config = devices::builtin("pic18f4620").unwrap();
        config.registers[0].address = 0x1000;
        assert!(RegisterCatalog::load(Some(&config)).is_err());
    }

    #[test]
    fn test_render_config() {
        let cat = catalog();
        // CONFIG1H: HS oscillator, fail-safe monitor off, switchover on
        assert_eq!(cat.render_config(0x300001, 0x82), "FOSC=HS, FCMEN=OFF, IESO=ON");
        assert_eq!(cat.render_config(0x300001, 0x0D), "FOSC=0xD, FCMEN=OFF, IESO=OFF");
        assert_eq!(cat.render_config(0x300002, 0x1F), "PWRT=OFF, BOREN=SBORDIS, BORV=0x3");
        assert_eq!(cat.render_config(0x300000, 0x00), "0x300000=0x00");
    }

    #[test]
    fn test_config_field_must_fit_in_a_byte() {
        let mut config = devices::builtin("pic18f4620").unwrap();
        config.config_words[0].fields[0].width = 9;
        assert!(matches!(
            RegisterCatalog::load(Some(&config)),
            Err(LiftError::DeviceConfig(msg)) if msg.contains("FOSC")
        ));
    }

    #[test]
    fn test_enhanced_device() {
        let cat = RegisterCatalog::load(Some(&devices::builtin("pic18f46k42").unwrap())).unwrap();
        assert_eq!(cat.family(), Family::Enhanced);
        assert_eq!(cat.lookup(0x3FD8, 8).unwrap().name, "STATUS");
        assert!(cat.is_forbidden_destination(0x3FF9));
        assert_eq!(cat.core().wreg.name, "WREG");
    }
}
