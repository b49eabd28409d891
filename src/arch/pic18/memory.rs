//! PIC18 program and data memory addressing.
//!
//! Both the operand renderer and the rewriter resolve data operands through
//! [`DataMemory::resolve`], so the two never disagree about which storage
//! location an operand denotes.

use super::config::Family;
use super::ExecMode;
use crate::Address;

/// Program memory is byte addressed over 21 bits.
pub const PROGRAM_ADDRESS_MASK: Address = 0x1F_FFFF;

/// Highest access-bank offset that extended mode turns into an FSR2 index.
pub const FSR2_INDEX_LIMIT: u8 = 0x5F;

/// Target of a relative branch: the offset counts words from the next instruction.
pub fn relative_target(instr_address: Address, word_offset: i32) -> Address {
    let target = instr_address as i64 + 2 + word_offset as i64 * 2;
    (target as u64) & PROGRAM_ADDRESS_MASK
}

/// Byte address of an absolute program word address.
pub fn absolute_target(word_address: u32) -> Address {
    ((word_address as Address) << 1) & PROGRAM_ADDRESS_MASK
}

pub fn can_be_fsr2_index(offset: u8) -> bool {
    offset <= FSR2_INDEX_LIMIT
}

/// A data-memory location named by an instruction's 8-bit file operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLocation {
    /// `[FSR2 + offset]`, extended mode only.
    Indexed(u8),
    /// Offset within the bank selected by BSR.
    Banked(u8),
    /// Fully resolved data address (access bank or absolute operand).
    Absolute(u16),
}

/// Layout of a device's data memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMemory {
    family: Family,
    access_split: u16,
    sfr_window: u16,
}

impl DataMemory {
    pub fn new(family: Family, access_split: u16, sfr_window: u16) -> Self {
        Self {
            family,
            access_split,
            sfr_window,
        }
    }

    pub fn for_family(family: Family) -> Self {
        match family {
            Family::Traditional => Self::new(family, 0x80, 0xF00),
            Family::Enhanced => Self::new(family, 0x60, 0x3F00),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn access_split(&self) -> u16 {
        self.access_split
    }

    pub fn sfr_window(&self) -> u16 {
        self.sfr_window
    }

    /// Mask of a full data address: 12 bits traditional, 14 bits enhanced.
    pub fn address_mask(&self) -> u16 {
        match self.family {
            Family::Traditional => 0x0FFF,
            Family::Enhanced => 0x3FFF,
        }
    }

    /// Absolute address of an access-bank offset. Offsets below the split
    /// are general purpose RAM; the rest map into the SFR window.
    pub fn remap_access(&self, offset: u8) -> u16 {
        let offset = offset as u16;
        if offset < self.access_split {
            offset
        } else {
            self.sfr_window | offset
        }
    }

    pub fn resolve(&self, offset: u8, access: bool, mode: ExecMode) -> DataLocation {
        if mode == ExecMode::Extended && access && can_be_fsr2_index(offset) {
            DataLocation::Indexed(offset)
        } else if !access {
            DataLocation::Banked(offset)
        } else {
            DataLocation::Absolute(self.remap_access(offset))
        }
    }
}
