//! # Register Bit, Byte and Word Helpers
//!
//! Sub-register access used by block accessors and the write merge, and the
//! word ordering used to assemble 32-bit values from two holding registers.
//!
//! ## Naming Convention
//!
//! Uses ABCD notation where A is the most significant byte. For the 32-bit
//! value `0x00020001` spread over registers `[r0, r1]`:
//! - `HighWordFirst (ABCD)`: r0 = 0x0002, r1 = 0x0001
//! - `LowWordFirst (CDAB)`: r0 = 0x0001, r1 = 0x0002

use std::fmt;

/// Order of the two 16-bit halves of a 32-bit value.
///
/// # Example
///
/// ```rust
/// use modbus_engine::WordOrder;
///
/// assert_eq!(WordOrder::from_word_swap(false), WordOrder::HighWordFirst);
/// assert_eq!(WordOrder::from_word_swap(true), WordOrder::LowWordFirst);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WordOrder {
    /// ABCD: high word at the lower register address
    #[default]
    HighWordFirst,

    /// CDAB: low word at the lower register address
    LowWordFirst,
}

impl WordOrder {
    /// Map the tag `word_swap` flag onto a word order.
    #[inline]
    pub fn from_word_swap(word_swap: bool) -> Self {
        if word_swap {
            Self::LowWordFirst
        } else {
            Self::HighWordFirst
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighWordFirst => "ABCD (high word first)",
            Self::LowWordFirst => "CDAB (low word first)",
        }
    }
}

impl fmt::Display for WordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// 32-bit Assembly
// ============================================================================

/// Combine two consecutive registers into a u32.
///
/// # Example
///
/// ```rust
/// use modbus_engine::{regs_to_u32, WordOrder};
///
/// assert_eq!(regs_to_u32([2, 1], WordOrder::HighWordFirst), 131073);
/// assert_eq!(regs_to_u32([2, 1], WordOrder::LowWordFirst), 65538);
/// ```
#[inline]
pub fn regs_to_u32(regs: [u16; 2], order: WordOrder) -> u32 {
    let (high, low) = match order {
        WordOrder::HighWordFirst => (regs[0], regs[1]),
        WordOrder::LowWordFirst => (regs[1], regs[0]),
    };
    ((high as u32) << 16) | low as u32
}

/// Split a u32 into two consecutive registers.
#[inline]
pub fn u32_to_regs(value: u32, order: WordOrder) -> [u16; 2] {
    let high = (value >> 16) as u16;
    let low = (value & 0xFFFF) as u16;
    match order {
        WordOrder::HighWordFirst => [high, low],
        WordOrder::LowWordFirst => [low, high],
    }
}

// ============================================================================
// Sub-register Access
// ============================================================================

/// Read bit `bit` (0 = LSB) of a register.
#[inline]
pub fn reg_bit(reg: u16, bit: u8) -> bool {
    (reg >> bit) & 1 == 1
}

/// Return `reg` with bit `bit` set or cleared.
#[inline]
pub fn with_bit(reg: u16, bit: u8, value: bool) -> u16 {
    if value {
        reg | (1 << bit)
    } else {
        reg & !(1 << bit)
    }
}

/// Read one half of a register: index 0 is the low byte, anything else the
/// high byte.
#[inline]
pub fn reg_byte(reg: u16, index: u8) -> u8 {
    if index == 0 {
        (reg & 0x00FF) as u8
    } else {
        (reg >> 8) as u8
    }
}

/// Return `reg` with one half replaced, leaving the other half untouched.
#[inline]
pub fn with_byte(reg: u16, index: u8, value: u8) -> u16 {
    if index == 0 {
        (reg & 0xFF00) | value as u16
    } else {
        (reg & 0x00FF) | ((value as u16) << 8)
    }
}
