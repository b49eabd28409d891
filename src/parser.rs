//! Goblin-based multi-format binary inspection.
//!
//! Loading proper (relocations, imports) is someone else's job. The
//! rewriter only needs to know the architecture and where the executable
//! bytes are.

use std::fmt;

use goblin::mach::{constants::cputype, Mach, MachO};
use goblin::{elf, pe, Object};

use crate::{Address, Architecture, LiftError};

/// A section (or segment) of an object file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name
    pub name: String,
    /// Starting virtual address of the section
    pub address: Address,
    /// Offset of the section's bytes in the file
    pub offset: usize,
    /// Size of the section in bytes
    pub size: usize,
    /// Whether this section contains executable code
    pub executable: bool,
}

impl Section {
    pub fn new(name: String, address: Address, offset: usize, size: usize, executable: bool) -> Self {
        Self {
            name,
            address,
            offset,
            size,
            executable,
        }
    }

    /// Get the end address of this section
    pub fn end_address(&self) -> Address {
        self.address + self.size as Address
    }

    /// The section's bytes, if they lie within `data`.
    pub fn bytes<'d>(&self, data: &'d [u8]) -> Option<&'d [u8]> {
        data.get(self.offset..self.offset.checked_add(self.size)?)
    }
}

/// What the rewriter needs to know about an object file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMetadata {
    /// Detected architecture
    pub architecture: Architecture,
    /// Entry point address, if available
    pub entry_point: Option<Address>,
    /// List of sections found in the binary
    pub sections: Vec<Section>,
    /// Index of the main code section, if found
    pub text_section: Option<usize>,
}

impl BinaryMetadata {
    /// Fallback metadata when no headers could be parsed.
    pub fn default_raw() -> Self {
        Self {
            architecture: Architecture::Unknown,
            entry_point: None,
            sections: Vec::new(),
            text_section: None,
        }
    }

    /// The main code section, else the first executable one.
    pub fn code_section(&self) -> Option<&Section> {
        self.text_section
            .and_then(|i| self.sections.get(i))
            .or_else(|| self.sections.iter().find(|s| s.executable && s.size > 0))
    }

    /// Address and bytes of the code section.
    pub fn code_region<'d>(&self, data: &'d [u8]) -> Option<(Address, &'d [u8])> {
        let section = self.code_section()?;
        Some((section.address, section.bytes(data)?))
    }
}

/// Parser trait: turn raw bytes into `BinaryMetadata`.
pub trait BinaryParser: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<BinaryMetadata, LiftError>;
}

/// A parser that handles ELF, PE, and Mach-O via Goblin.
#[derive(Debug, Default)]
pub struct GoblinParser;

impl GoblinParser {
    pub fn new() -> Self {
        GoblinParser
    }

    fn parse_elf(&self, elf: elf::Elf<'_>) -> BinaryMetadata {
        let architecture = match elf.header.e_machine {
            elf::header::EM_386 => Architecture::X86_32,
            elf::header::EM_X86_64 => Architecture::X86_64,
            _ => Architecture::Unknown,
        };

        let sections: Vec<Section> = elf
            .section_headers
            .iter()
            .filter_map(|sh| {
                let name = elf.shdr_strtab.get_at(sh.sh_name)?;
                Some(Section::new(
                    name.to_string(),
                    sh.sh_addr,
                    sh.sh_offset as usize,
                    sh.sh_size as usize,
                    sh.is_executable(),
                ))
            })
            .collect();
        let text_section = sections.iter().position(|s| s.name == ".text");

        BinaryMetadata {
            architecture,
            entry_point: Some(elf.entry),
            sections,
            text_section,
        }
    }

    fn parse_pe(&self, pe: pe::PE<'_>) -> BinaryMetadata {
        let architecture = match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => Architecture::X86_32,
            pe::header::COFF_MACHINE_X86_64 => Architecture::X86_64,
            _ => Architecture::Unknown,
        };

        let sections: Vec<Section> = pe
            .sections
            .iter()
            .map(|sect| {
                let executable =
                    (sect.characteristics & pe::section_table::IMAGE_SCN_MEM_EXECUTE) != 0;
                Section::new(
                    sect.name().unwrap_or("").to_string(),
                    pe.image_base as Address + sect.virtual_address as Address,
                    sect.pointer_to_raw_data as usize,
                    sect.size_of_raw_data as usize,
                    executable,
                )
            })
            .collect();
        let text_section = sections
            .iter()
            .position(|s| s.name.to_lowercase().contains(".text"));

        BinaryMetadata {
            architecture,
            entry_point: Some(pe.image_base as Address + pe.entry as Address),
            sections,
            text_section,
        }
    }

    fn parse_macho(&self, macho: &MachO<'_>) -> BinaryMetadata {
        let architecture = match macho.header.cputype {
            cputype::CPU_TYPE_I386 => Architecture::X86_32,
            cputype::CPU_TYPE_X86_64 => Architecture::X86_64,
            _ => Architecture::Unknown,
        };

        // Segments stand in for sections; VM_PROT_EXECUTE is 0x4.
        let mut sections = Vec::new();
        for segment in &macho.segments {
            sections.push(Section::new(
                segment.name().unwrap_or("").to_string(),
                segment.vmaddr as Address,
                segment.fileoff as usize,
                segment.filesize as usize,
                (segment.maxprot & 0x4) != 0,
            ));
        }
        let text_section = sections.iter().position(|s| s.name == "__TEXT");

        BinaryMetadata {
            architecture,
            entry_point: Some(macho.entry as Address),
            sections,
            text_section,
        }
    }
}

impl fmt::Display for GoblinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinParser")
    }
}

impl BinaryParser for GoblinParser {
    fn parse(&self, data: &[u8]) -> Result<BinaryMetadata, LiftError> {
        let metadata = match Object::parse(data) {
            Ok(Object::Elf(elf)) => self.parse_elf(elf),
            Ok(Object::PE(pe)) => self.parse_pe(pe),
            Ok(Object::Mach(Mach::Binary(macho))) => self.parse_macho(&macho),
            Ok(Object::Mach(Mach::Fat(_))) => {
                return Err(LiftError::ParsingError(
                    "Fat Mach-O archives are not supported; extract one architecture first".into(),
                ))
            }
            Ok(_) => return Err(LiftError::ParsingError("Unsupported file format".into())),
            Err(e) => return Err(LiftError::ParsingError(e.to_string())),
        };
        log::debug!(
            "parsed {} object with {} sections",
            metadata.architecture,
            metadata.sections.len()
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal 64-bit little-endian x86-64 ELF executable with one
    /// section header table entry (the null section) and no program headers.
    fn tiny_elf() -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(b"\x7fELF");
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // little endian
        data[6] = 1; // EV_CURRENT
        data[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        data[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        data[20..24].copy_from_slice(&1u32.to_le_bytes());
        data[24..32].copy_from_slice(&0x401000u64.to_le_bytes()); // e_entry
        data[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        data[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        data[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        data
    }

    #[test]
    fn test_default_raw() {
        let meta = BinaryMetadata::default_raw();
        assert_eq!(meta.architecture, Architecture::Unknown);
        assert!(meta.entry_point.is_none());
        assert!(meta.code_section().is_none());
        assert!(meta.code_region(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_parse_elf_header() {
        let meta = GoblinParser::new().parse(&tiny_elf()).unwrap();
        assert_eq!(meta.architecture, Architecture::X86_64);
        assert_eq!(meta.entry_point, Some(0x401000));
    }

    #[test]
    fn test_raw_bytes_are_not_an_object() {
        let err = GoblinParser::new().parse(&[0x0E, 0x05, 0x12, 0x00]).unwrap_err();
        assert!(matches!(err, LiftError::ParsingError(_)));
    }

    #[test]
    fn test_code_region_bounds() {
        let meta = BinaryMetadata {
            architecture: Architecture::X86_32,
            entry_point: None,
            sections: vec![
                Section::new(".data".into(), 0x2000, 0, 4, false),
                Section::new(".text".into(), 0x1000, 4, 4, true),
            ],
            text_section: None,
        };
        let data = [0, 0, 0, 0, 0x90, 0x90, 0xC3, 0x00];
        assert_eq!(meta.code_region(&data), Some((0x1000, &data[4..8])));
        assert!(meta.sections[1].bytes(&data[..6]).is_none());
        assert_eq!(meta.sections[1].end_address(), 0x1004);
    }
}
