//! Primitive data types carried by IR expressions and identifiers.

use std::fmt;

/// Primitive data type of an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Byte,
    Word16,
    Word32,
    Word64,
    Word128,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    /// 16-bit data pointer (PIC18 data memory).
    Ptr16,
    /// 32-bit code or data pointer.
    Ptr32,
    Ptr64,
    Real32,
    Real64,
    Real80,
    Void,
}

impl DataType {
    /// Size of the type in bits.
    pub fn bit_size(self) -> u32 {
        match self {
            DataType::Bool => 1,
            DataType::Byte | DataType::Int8 | DataType::UInt8 => 8,
            DataType::Word16 | DataType::Int16 | DataType::UInt16 | DataType::Ptr16 => 16,
            DataType::Word32 | DataType::Int32 | DataType::UInt32 | DataType::Ptr32 => 32,
            DataType::Word64 | DataType::Int64 | DataType::UInt64 | DataType::Ptr64 => 64,
            DataType::Word128 | DataType::Int128 | DataType::UInt128 => 128,
            DataType::Real32 => 32,
            DataType::Real64 => 64,
            DataType::Real80 => 80,
            DataType::Void => 0,
        }
    }

    /// Size of the type in bytes, rounded up.
    pub fn byte_size(self) -> u32 {
        (self.bit_size() + 7) / 8
    }

    /// Untyped word of the given bit width.
    pub fn word(bits: u32) -> DataType {
        match bits {
            0 | 1 => DataType::Bool,
            2..=8 => DataType::Byte,
            9..=16 => DataType::Word16,
            17..=32 => DataType::Word32,
            33..=64 => DataType::Word64,
            _ => DataType::Word128,
        }
    }

    /// Signed integer of the given bit width.
    pub fn int(bits: u32) -> DataType {
        match bits {
            0..=8 => DataType::Int8,
            9..=16 => DataType::Int16,
            17..=32 => DataType::Int32,
            33..=64 => DataType::Int64,
            _ => DataType::Int128,
        }
    }

    /// Unsigned integer of the given bit width.
    pub fn uint(bits: u32) -> DataType {
        match bits {
            0..=8 => DataType::UInt8,
            9..=16 => DataType::UInt16,
            17..=32 => DataType::UInt32,
            33..=64 => DataType::UInt64,
            _ => DataType::UInt128,
        }
    }

    /// IEEE real of the given bit width; anything wider than 64 is extended precision.
    pub fn real(bits: u32) -> DataType {
        match bits {
            0..=32 => DataType::Real32,
            33..=64 => DataType::Real64,
            _ => DataType::Real80,
        }
    }

    /// Mask selecting the low `bit_size` bits of a value.
    pub fn mask(self) -> u64 {
        match self.bit_size() {
            0 => 0,
            bits if bits >= 64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    /// Number of hex digits used when rendering constants of this type.
    pub fn hex_digits(self) -> usize {
        ((self.bit_size().min(64) + 3) / 4).max(1) as usize
    }

    pub fn is_real(self) -> bool {
        matches!(self, DataType::Real32 | DataType::Real64 | DataType::Real80)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Byte => "byte",
            DataType::Word16 => "word16",
            DataType::Word32 => "word32",
            DataType::Word64 => "word64",
            DataType::Word128 => "word128",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Int128 => "int128",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::UInt128 => "uint128",
            DataType::Ptr16 => "ptr16",
            DataType::Ptr32 => "ptr32",
            DataType::Ptr64 => "ptr64",
            DataType::Real32 => "real32",
            DataType::Real64 => "real64",
            DataType::Real80 => "real80",
            DataType::Void => "void",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_widths() {
        assert_eq!(DataType::word(8), DataType::Byte);
        assert_eq!(DataType::word(12), DataType::Word16);
        assert_eq!(DataType::word(24), DataType::Word32);
        assert_eq!(DataType::int(128), DataType::Int128);
        assert_eq!(DataType::Word16.byte_size(), 2);
        assert_eq!(DataType::Bool.byte_size(), 1);
        assert_eq!(DataType::real(32), DataType::Real32);
        assert_eq!(DataType::real(80), DataType::Real80);
        assert!(DataType::Real32.is_real());
    }

    #[test]
    fn test_mask_and_digits() {
        assert_eq!(DataType::Byte.mask(), 0xFF);
        assert_eq!(DataType::Word64.mask(), u64::MAX);
        assert_eq!(DataType::Word16.hex_digits(), 4);
        assert_eq!(DataType::Ptr32.hex_digits(), 8);
    }
}
