//! Scaled, typed views onto block registers
//!
//! A [`Tag`] is built once from configuration. Its `value` and `validity`
//! only change through [`Tag::decode`], [`Tag::encode`] and
//! [`Tag::set_value`]; any data-plane failure turns the value into `"#"` and
//! the validity into the failing error kind.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::bytes::{regs_to_u32, u32_to_regs, WordOrder};
use crate::codec::{Scaling, TagType};
use crate::config::TagConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::interface::DataInterface;
use crate::value::{RawValue, RawWidth};

/// Value shown while a tag is invalid
pub const INVALID_VALUE: &str = "#";

/// Tag validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validity {
    #[default]
    Valid,
    Invalid(ModbusError),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }

    /// `"valid"` or the error kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Validity::Valid => "valid",
            Validity::Invalid(e) => e.as_str(),
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Validity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One configured tag with its current value.
#[derive(Debug, Clone)]
pub struct Tag {
    id: u32,
    name: String,
    device_id: String,
    block_id: String,
    address: u16,
    sub_address: u8,
    tag_type: TagType,
    scaling: Scaling,
    word_order: WordOrder,
    value: String,
    validity: Validity,
}

impl Tag {
    pub fn new(config: &TagConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            device_id: config.device_id.clone(),
            block_id: config.block_id.clone(),
            address: config.address,
            sub_address: config.sub_address,
            tag_type: config.tag_type,
            scaling: Scaling {
                multiply: config.multiply,
                add: config.add,
                divider: config.divider,
            },
            word_order: WordOrder::from_word_swap(config.word_swap),
            value: config.tag_type.initial_value().to_string(),
            validity: Validity::Valid,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    /// Stage a value for the next [`Tag::encode`].
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    /// Refresh `value` from the block.
    pub fn decode<D: DataInterface + ?Sized>(&mut self, data: &D) {
        match self.read_raw(data) {
            Ok(raw) => {
                self.value = self.tag_type.decode(raw, &self.scaling);
                self.validity = Validity::Valid;
            }
            Err(e) => self.invalidate(e),
        }
    }

    /// Queue the staged `value` for writing. Non-numeric values are ignored.
    ///
    /// Returns whether anything was queued.
    pub fn encode<D: DataInterface + ?Sized>(&mut self, data: &D) -> bool {
        let Some(raw) = self.tag_type.encode(&self.value, &self.scaling) else {
            debug!("Tag {} ({}): '{}' is not a number, not written", self.id, self.name, self.value);
            return false;
        };

        match self.write_raw(data, raw) {
            Ok(()) => {
                self.validity = Validity::Valid;
                true
            }
            Err(e) => {
                self.invalidate(e);
                false
            }
        }
    }

    fn invalidate(&mut self, error: ModbusError) {
        self.validity = Validity::Invalid(error);
        self.value = INVALID_VALUE.to_string();
    }

    fn read_raw<D: DataInterface + ?Sized>(&self, data: &D) -> ModbusResult<RawValue> {
        let (dev, blk, addr) = (self.device_id.as_str(), self.block_id.as_str(), self.address);
        Ok(match self.tag_type.width() {
            RawWidth::Bit => RawValue::Bit(data.read_bit(dev, blk, addr, self.sub_address)?),
            RawWidth::Byte => RawValue::Byte(data.read_byte(dev, blk, addr, self.sub_address)?),
            RawWidth::Word => RawValue::Word(data.read_word(dev, blk, addr)?),
            RawWidth::DWord => {
                RawValue::DWord(regs_to_u32(data.read_word_pair(dev, blk, addr)?, self.word_order))
            }
        })
    }

    fn write_raw<D: DataInterface + ?Sized>(&self, data: &D, raw: RawValue) -> ModbusResult<()> {
        let (dev, blk, addr) = (self.device_id.as_str(), self.block_id.as_str(), self.address);
        match raw {
            RawValue::Bit(v) => data.write_bit(dev, blk, addr, self.sub_address, v),
            RawValue::Byte(v) => data.write_byte(dev, blk, addr, self.sub_address, v),
            RawValue::Word(v) => data.write_word(dev, blk, addr, v),
            RawValue::DWord(v) => data.write_word_pair(dev, blk, addr, u32_to_regs(v, self.word_order)),
        }
    }
}
