//! Raw register content behind a tag
//!
//! A tag reads or writes exactly one of these widths through the data-plane
//! interface. Scaling and formatting happen in the codec, never here.

use std::fmt;

/// Wire width of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawWidth {
    Bit,
    Byte,
    Word,
    DWord,
}

impl RawWidth {
    /// Registers touched starting at the tag address.
    pub fn register_span(&self) -> u16 {
        match self {
            RawWidth::DWord => 2,
            _ => 1,
        }
    }
}

/// Unscaled value as stored in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawValue {
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
}

impl RawValue {
    pub fn width(&self) -> RawWidth {
        match self {
            RawValue::Bit(_) => RawWidth::Bit,
            RawValue::Byte(_) => RawWidth::Byte,
            RawValue::Word(_) => RawWidth::Word,
            RawValue::DWord(_) => RawWidth::DWord,
        }
    }

    /// Zero-extended numeric content.
    pub fn bits(&self) -> u32 {
        match *self {
            RawValue::Bit(v) => v as u32,
            RawValue::Byte(v) => v as u32,
            RawValue::Word(v) => v as u32,
            RawValue::DWord(v) => v,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Bit(v) => write!(f, "{}", *v as u8),
            RawValue::Byte(v) => write!(f, "0x{:02X}", v),
            RawValue::Word(v) => write!(f, "0x{:04X}", v),
            RawValue::DWord(v) => write!(f, "0x{:08X}", v),
        }
    }
}
