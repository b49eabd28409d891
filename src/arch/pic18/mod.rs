//! Microchip PIC18 back-end.
//!
//! Unlike x86 the decoder is native: PIC18 encodings are fixed 16-bit words
//! with a handful of two- and three-word forms. Everything device specific
//! (register names, SFR window, far-move restrictions) comes from a
//! [`DeviceConfig`] loaded into a [`RegisterCatalog`].

pub mod config;
pub mod decoder;
pub mod devices;
pub mod instruction;
pub mod memory;
pub mod opcodes;
pub mod operands;
pub mod registers;
pub mod rewriter;

pub use config::{DeviceConfig, Family};
pub use decoder::Pic18Decoder;
pub use instruction::Pic18Instruction;
pub use memory::{DataLocation, DataMemory};
pub use opcodes::Opcode;
pub use operands::{BankedAddress, Destination, Operand, Pic18Storage, PseudoData, TableMode};
pub use registers::RegisterCatalog;
pub use rewriter::Pic18Rewriter;

use clap::ValueEnum;

/// Execution mode, selected by the XINST configuration bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum ExecMode {
    /// Legacy instruction set and addressing.
    #[default]
    Traditional,
    /// Extended instruction set; access-bank offsets up to 0x5F index off FSR2.
    Extended,
}
