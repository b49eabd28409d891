//! Core traits, errors, and dispatch for the Nuclide Lift instruction rewriter.
//!
//! This library turns machine code into a canonical register-transfer IR.
//! A [`Decoder`] produces architecture-specific instructions. An
//! [`InstructionRewriter`](rewriter::InstructionRewriter) lowers each of them
//! into an [`InstructionCluster`](ir::InstructionCluster). Two back-ends ship
//! with the crate: PIC18 (native decoder, device-driven register catalog) and
//! x86 (Capstone-backed decoder).
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nuclide_lift::{
//!     arch::pic18::{devices, Pic18Decoder, Pic18Rewriter, RegisterCatalog, ExecMode},
//!     pseudo::PseudoProcedureTable,
//!     rewrite_image,
//! };
//!
//! let config = devices::builtin("pic18f4620").unwrap();
//! let catalog = Arc::new(RegisterCatalog::load(Some(&config)).unwrap());
//! let decoder = Pic18Decoder::new(catalog.family(), ExecMode::Traditional);
//! let rewriter = Pic18Rewriter::new(Arc::clone(&catalog));
//! let host = PseudoProcedureTable::new();
//!
//! let image = std::fs::read("firmware.bin").unwrap();
//! for cluster in rewrite_image(&decoder, &rewriter, &host, &image, 0) {
//!     print!("{}", cluster.unwrap());
//! }
//! ```

pub mod arch;
pub mod decoder;
pub mod emitter;
pub mod format;
pub mod ir;
pub mod parser;
pub mod pseudo;
pub mod rewriter;
pub mod stream;
pub mod sweep;
mod large_tests;

use std::fmt;

use clap::ValueEnum;

use crate::decoder::DecodeError;
use crate::pseudo::RewriterHost;
use crate::rewriter::{InstructionRewriter, RewriterStream};
use crate::stream::InstructionStream;

/// Represents an address in memory
pub type Address = u64;

/// A decoded, architecture-specific machine instruction.
pub trait MachineInstruction: Clone + Send {
    /// Address of the instruction
    fn address(&self) -> Address;

    /// Size of the instruction in bytes
    fn length(&self) -> u32;

    /// Opcode mnemonic, as used in diagnostics
    fn mnemonic(&self) -> String;
}

/// Decoder trait: architecture-specific disassembler.
pub trait Decoder: Send + Sync {
    type Instr: MachineInstruction;

    fn architecture(&self) -> Architecture;

    /// Decode a single instruction from the start of `bytes`, which is
    /// located at `address`.
    ///
    /// # Returns
    /// `Ok(None)` at end of input, `Ok(Some(_))` for a decoded instruction,
    /// and `Err(_)` when the bytes cannot be decoded at all.
    fn decode(&self, bytes: &[u8], address: Address) -> Result<Option<Self::Instr>, DecodeError>;
}

/// Lazily rewrite `image`, mapped at `base`, from its first byte.
pub fn rewrite_image<'a, D, R>(
    decoder: &'a D,
    rewriter: &'a R,
    host: &'a dyn RewriterHost,
    image: &'a [u8],
    base: Address,
) -> RewriterStream<'a, D, R>
where
    D: Decoder,
    R: InstructionRewriter<Instr = D::Instr>,
{
    RewriterStream::new(InstructionStream::new(decoder, image, base), rewriter, host)
}

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[non_exhaustive]
pub enum Architecture {
    /// Microchip PIC18
    #[value(name = "pic18")]
    Pic18,
    /// 16-bit real-mode x86
    #[value(name = "x86-16")]
    X86_16,
    /// 32-bit x86
    #[value(name = "x86-32")]
    X86_32,
    /// 64-bit x86
    #[value(name = "x86-64")]
    X86_64,
    /// Unknown architecture
    #[value(skip)]
    Unknown,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Pic18 => write!(f, "PIC18"),
            Architecture::X86_16 => write!(f, "x86-16"),
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::X86_64 => write!(f, "x86-64"),
            Architecture::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Error type for rewriting operations
#[derive(Debug, thiserror::Error)]
pub enum LiftError {
    /// The back-end has no rewrite for this opcode
    #[error("Rewriting {architecture} opcode '{opcode}' is not supported yet (at 0x{address:X}).")]
    UnsupportedOpcode {
        address: Address,
        architecture: Architecture,
        opcode: String,
    },

    /// A pseudo-procedure was requested with a different arity than it was registered with
    #[error("Pseudoprocedure {name} expected {expected} arguments, but was passed {actual}.")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A decoded instruction lacks an operand its rewrite needs
    #[error("Malformed instruction at 0x{address:X}: {reason}")]
    MalformedInstruction { address: Address, reason: String },

    /// PIC18 rewriting was requested without a device description
    #[error("No device configuration supplied; PIC18 rewriting needs a register catalog")]
    MissingDeviceConfig,

    /// The device description is inconsistent
    #[error("Invalid device configuration: {0}")]
    DeviceConfig(String),

    /// Decoder error
    #[error("Decoder error: {0}")]
    Decode(#[from] DecodeError),

    /// Unsupported architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),

    /// Failed to parse binary format
    #[error("Failed to parse binary format: {0}")]
    ParsingError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_opcode_message() {
        let err = LiftError::UnsupportedOpcode {
            address: 0x401000,
            architecture: Architecture::X86_32,
            opcode: "cpuid".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Rewriting x86-32 opcode 'cpuid' is not supported yet (at 0x401000)."
        );
    }

    #[test]
    fn test_arity_message() {
        let err = LiftError::ArityMismatch {
            name: "__rol".to_string(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Pseudoprocedure __rol expected 2 arguments, but was passed 3."
        );
    }

    #[test]
    fn test_architecture_cli_names() {
        let arch = Architecture::from_str("x86-64", true).unwrap();
        assert_eq!(arch, Architecture::X86_64);
        assert!(Architecture::from_str("unknown", true).is_err());
    }
}
