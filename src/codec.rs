//! # Tag Value Codec
//!
//! Conversion between raw block content and the scaled display string of a
//! tag. Each of the eight tag types has its own decode/encode pair, looked up
//! through [`TagType::codec`].
//!
//! ## Supported Tag Types
//!
//! | Type | Width | Range |
//! |------|-------|-------|
//! | bit | 1 bit | 0..=1 |
//! | byte | half register | -128..=127 |
//! | ubyte | half register | 0..=255 |
//! | word | 1 register | -32768..=32767 |
//! | uword | 1 register | 0..=65535 |
//! | dword | 2 registers | -2^31..=2^31-1 |
//! | udword | 2 registers | 0..=2^32-1 |
//! | real16 | 1 register | fixed point, `raw / divider` |
//!
//! ## Signed Representation
//!
//! Signed types do not use two's complement on the wire. A raw value above
//! the type maximum decodes as `max - raw`, and a negative value encodes as
//! `max - value`, so raw `0x8000` is `-1` for a word and `0xFFFF` is
//! `-32768`. Field devices configured for this engine expect that mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::{RawValue, RawWidth};

/// The eight tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Bit,
    Byte,
    UByte,
    Word,
    UWord,
    DWord,
    UDWord,
    Real16,
}

/// Scale parameters shared by every tag type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub multiply: f64,
    pub add: f64,
    /// Fixed-point divider, only meaningful for `real16`
    pub divider: u16,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            multiply: 1.0,
            add: 0.0,
            divider: 1,
        }
    }
}

/// Decode/encode pair for one tag type.
pub struct VariantCodec {
    pub width: RawWidth,
    pub initial_value: &'static str,
    decode: fn(u32, &Scaling) -> String,
    encode: fn(f64, &Scaling) -> RawValue,
}

// Indexed by `TagType as usize`
static CODECS: [VariantCodec; 8] = [
    VariantCodec {
        width: RawWidth::Bit,
        initial_value: "0",
        decode: decode_bit,
        encode: encode_bit,
    },
    VariantCodec {
        width: RawWidth::Byte,
        initial_value: "0",
        decode: decode_byte,
        encode: encode_byte,
    },
    VariantCodec {
        width: RawWidth::Byte,
        initial_value: "0",
        decode: decode_ubyte,
        encode: encode_ubyte,
    },
    VariantCodec {
        width: RawWidth::Word,
        initial_value: "0",
        decode: decode_word,
        encode: encode_word,
    },
    VariantCodec {
        width: RawWidth::Word,
        initial_value: "0",
        decode: decode_uword,
        encode: encode_uword,
    },
    VariantCodec {
        width: RawWidth::DWord,
        initial_value: "0",
        decode: decode_dword,
        encode: encode_dword,
    },
    VariantCodec {
        width: RawWidth::DWord,
        initial_value: "0",
        decode: decode_udword,
        encode: encode_udword,
    },
    VariantCodec {
        width: RawWidth::Word,
        initial_value: "0.0",
        decode: decode_real16,
        encode: encode_real16,
    },
];

impl TagType {
    pub const ALL: [TagType; 8] = [
        TagType::Bit,
        TagType::Byte,
        TagType::UByte,
        TagType::Word,
        TagType::UWord,
        TagType::DWord,
        TagType::UDWord,
        TagType::Real16,
    ];

    #[inline]
    pub fn codec(self) -> &'static VariantCodec {
        &CODECS[self as usize]
    }

    pub fn width(self) -> RawWidth {
        self.codec().width
    }

    /// Value a tag shows before its first decode.
    pub fn initial_value(self) -> &'static str {
        self.codec().initial_value
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TagType::Bit => "bit",
            TagType::Byte => "byte",
            TagType::UByte => "ubyte",
            TagType::Word => "word",
            TagType::UWord => "uword",
            TagType::DWord => "dword",
            TagType::UDWord => "udword",
            TagType::Real16 => "real16",
        }
    }

    /// Scale raw content and format it for display.
    pub fn decode(self, raw: RawValue, scaling: &Scaling) -> String {
        (self.codec().decode)(raw.bits(), scaling)
    }

    /// Parse a display value and produce the raw content to write.
    ///
    /// Returns `None` when `value` is not a number.
    pub fn encode(self, value: &str, scaling: &Scaling) -> Option<RawValue> {
        let parsed: f64 = value.trim().parse().ok()?;
        if !parsed.is_finite() {
            return None;
        }
        Some((self.codec().encode)(parsed, scaling))
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tag type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTagType(pub String);

impl fmt::Display for UnknownTagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tag type '{}'", self.0)
    }
}

impl std::error::Error for UnknownTagType {}

impl FromStr for TagType {
    type Err = UnknownTagType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTagType(s.to_string()))
    }
}

// ============================================================================
// Shared Arithmetic
// ============================================================================

/// `max - raw` for raw values above the signed maximum.
#[inline]
fn from_offset_signed(raw: u32, max: i64) -> i64 {
    let raw = raw as i64;
    if raw > max {
        max - raw
    } else {
        raw
    }
}

/// Inverse of [`from_offset_signed`] for an already clamped value.
#[inline]
fn to_offset_signed(value: i64, max: i64) -> u32 {
    if value < 0 {
        (max - value) as u32
    } else {
        value as u32
    }
}

#[inline]
fn scale(raw: f64, s: &Scaling) -> f64 {
    raw * s.multiply + s.add
}

#[inline]
fn unscale(value: f64, s: &Scaling) -> f64 {
    (value - s.add) / s.multiply
}

/// Clamp and drop the fraction, the way integer tag values are displayed.
#[inline]
fn integral(value: f64, min: i64, max: i64) -> i64 {
    (value.trunc() as i64).clamp(min, max)
}

fn decode_integer(raw: i64, s: &Scaling, min: i64, max: i64) -> String {
    integral(scale(raw as f64, s), min, max).to_string()
}

fn encode_integer(value: f64, s: &Scaling, min: i64, max: i64) -> i64 {
    integral(unscale(value, s), min, max)
}

// ============================================================================
// Per-type Codecs
// ============================================================================

fn decode_bit(raw: u32, s: &Scaling) -> String {
    decode_integer(raw as i64 & 1, s, 0, 1)
}

fn encode_bit(value: f64, s: &Scaling) -> RawValue {
    RawValue::Bit(encode_integer(value, s, 0, 1) == 1)
}

fn decode_byte(raw: u32, s: &Scaling) -> String {
    decode_integer(from_offset_signed(raw, i8::MAX as i64), s, i8::MIN as i64, i8::MAX as i64)
}

fn encode_byte(value: f64, s: &Scaling) -> RawValue {
    let v = encode_integer(value, s, i8::MIN as i64, i8::MAX as i64);
    RawValue::Byte(to_offset_signed(v, i8::MAX as i64) as u8)
}

fn decode_ubyte(raw: u32, s: &Scaling) -> String {
    decode_integer(raw as i64, s, 0, u8::MAX as i64)
}

fn encode_ubyte(value: f64, s: &Scaling) -> RawValue {
    RawValue::Byte(encode_integer(value, s, 0, u8::MAX as i64) as u8)
}

fn decode_word(raw: u32, s: &Scaling) -> String {
    decode_integer(from_offset_signed(raw, i16::MAX as i64), s, i16::MIN as i64, i16::MAX as i64)
}

fn encode_word(value: f64, s: &Scaling) -> RawValue {
    let v = encode_integer(value, s, i16::MIN as i64, i16::MAX as i64);
    RawValue::Word(to_offset_signed(v, i16::MAX as i64) as u16)
}

fn decode_uword(raw: u32, s: &Scaling) -> String {
    decode_integer(raw as i64, s, 0, u16::MAX as i64)
}

fn encode_uword(value: f64, s: &Scaling) -> RawValue {
    RawValue::Word(encode_integer(value, s, 0, u16::MAX as i64) as u16)
}

fn decode_dword(raw: u32, s: &Scaling) -> String {
    decode_integer(from_offset_signed(raw, i32::MAX as i64), s, i32::MIN as i64, i32::MAX as i64)
}

fn encode_dword(value: f64, s: &Scaling) -> RawValue {
    let v = encode_integer(value, s, i32::MIN as i64, i32::MAX as i64);
    RawValue::DWord(to_offset_signed(v, i32::MAX as i64))
}

fn decode_udword(raw: u32, s: &Scaling) -> String {
    decode_integer(raw as i64, s, 0, u32::MAX as i64)
}

fn encode_udword(value: f64, s: &Scaling) -> RawValue {
    RawValue::DWord(encode_integer(value, s, 0, u32::MAX as i64) as u32)
}

/// Display digits for a fixed-point divider.
fn real16_precision(divider: u16) -> usize {
    match divider {
        10 => 1,
        100 => 2,
        1000 => 3,
        10000 => 4,
        _ => 0,
    }
}

#[inline]
fn real16_divider(s: &Scaling) -> f64 {
    s.divider.max(1) as f64
}

fn decode_real16(raw: u32, s: &Scaling) -> String {
    let fixed = from_offset_signed(raw, i16::MAX as i64) as f64 / real16_divider(s);
    format!("{:.*}", real16_precision(s.divider), scale(fixed, s))
}

fn encode_real16(value: f64, s: &Scaling) -> RawValue {
    let divider = real16_divider(s);
    let min = i16::MIN as f64 / divider;
    let max = i16::MAX as f64 / divider;
    let fixed = (unscale(value, s).clamp(min, max) * divider).round() as i64;
    RawValue::Word(to_offset_signed(fixed, i16::MAX as i64) as u16)
}
