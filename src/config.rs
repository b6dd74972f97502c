//! Engine configuration
//!
//! One YAML document describes every device with its blocks, plus a flat tag
//! list referring to them by id. Missing optional fields take the defaults in
//! [`crate::constants`].
//!
//! ```yaml
//! devices:
//!   - id: plc1
//!     ip: 192.168.0.10
//!     blocks:
//!       - { id: inputs, offset: 0, count: 20, cycle_time_ms: 500 }
//! tags:
//!   - { id: 1, name: temperature, device_id: plc1, block_id: inputs,
//!       address: 3, type: real16, divider: 10 }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::TagType;
use crate::constants::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_CYCLE_TIME_MS, DEFAULT_ERROR_SLEEP_MS, DEFAULT_PORT,
    DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_RETRIES, DEFAULT_UNIT_ID, MAX_WRITE_REGISTERS,
};

/// Configuration problems, reported before any device is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Device {index} has an empty id")]
    EmptyDeviceId { index: usize },

    #[error("Duplicate device id '{0}'")]
    DuplicateDevice(String),

    #[error("Device '{device}': block {index} has an empty id")]
    EmptyBlockId { device: String, index: usize },

    #[error("Device '{device}': duplicate block id '{block}'")]
    DuplicateBlock { device: String, block: String },

    #[error("Block '{device}/{block}': count {count} must be between 1 and {max}")]
    BlockCount {
        device: String,
        block: String,
        count: u16,
        max: usize,
    },

    #[error("Block '{device}/{block}': offset {offset} + count {count} exceeds the register space")]
    BlockRange {
        device: String,
        block: String,
        offset: u16,
        count: u16,
    },

    #[error("Duplicate tag id {0}")]
    DuplicateTag(u32),

    #[error("Tag {tag}: unknown device '{device}'")]
    UnknownDevice { tag: u32, device: String },

    #[error("Tag {tag}: unknown block '{device}/{block}'")]
    UnknownBlock { tag: u32, device: String, block: String },

    #[error("Tag {tag}: address {address} ({tag_type}) does not fit a block of {count} registers")]
    TagAddress {
        tag: u32,
        address: u16,
        tag_type: TagType,
        count: u16,
    },

    #[error("Tag {tag}: sub-address {sub_address} out of range for {tag_type}")]
    TagSubAddress {
        tag: u32,
        sub_address: u8,
        tag_type: TagType,
    },

    #[error("Tag {0}: multiply must not be zero")]
    ZeroMultiply(u32),

    #[error("Tag {tag}: real16 divider {divider} is not one of 1, 10, 100, 1000, 10000")]
    Divider { tag: u32, divider: u16 },
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_connection_timeout_ms() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_cycle_time_ms() -> u64 {
    DEFAULT_CYCLE_TIME_MS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_error_sleep_ms() -> u64 {
    DEFAULT_ERROR_SLEEP_MS
}

fn default_multiply() -> f64 {
    1.0
}

fn default_divider() -> u16 {
    1
}

/// One contiguous holding-register range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub id: String,
    pub offset: u16,
    pub count: u16,
    /// 0 reads the block once and then only after writes
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_error_sleep_ms")]
    pub error_sleep_ms: u64,
}

impl BlockConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    pub fn error_sleep(&self) -> Duration {
        Duration::from_millis(self.error_sleep_ms)
    }
}

/// One Modbus TCP endpoint and its blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Ping the host before opening TCP
    #[serde(default = "default_true")]
    pub probe_host: bool,
    /// Hex-dump every frame at debug level
    #[serde(default)]
    pub packet_logging: bool,
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,
}

impl DeviceConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// One tag. `address` is relative to the start of its block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    pub id: u32,
    pub name: String,
    pub device_id: String,
    pub block_id: String,
    pub address: u16,
    /// Bit number for `bit`, byte index for the byte types
    #[serde(default)]
    pub sub_address: u8,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    #[serde(default = "default_multiply")]
    pub multiply: f64,
    #[serde(default)]
    pub add: f64,
    #[serde(default = "default_divider")]
    pub divider: u16,
    #[serde(default)]
    pub word_swap: bool,
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // device id -> (block id -> count)
        let mut layout: HashMap<&str, HashMap<&str, u16>> = HashMap::new();

        for (index, device) in self.devices.iter().enumerate() {
            if device.id.is_empty() {
                return Err(ConfigError::EmptyDeviceId { index });
            }
            if layout.contains_key(device.id.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.id.clone()));
            }

            let mut blocks = HashMap::new();
            for (index, block) in device.blocks.iter().enumerate() {
                validate_block(&device.id, index, block)?;
                if blocks.insert(block.id.as_str(), block.count).is_some() {
                    return Err(ConfigError::DuplicateBlock {
                        device: device.id.clone(),
                        block: block.id.clone(),
                    });
                }
            }
            layout.insert(device.id.as_str(), blocks);
        }

        let mut tag_ids = HashSet::new();
        for tag in &self.tags {
            if !tag_ids.insert(tag.id) {
                return Err(ConfigError::DuplicateTag(tag.id));
            }
            let blocks = layout.get(tag.device_id.as_str()).ok_or_else(|| ConfigError::UnknownDevice {
                tag: tag.id,
                device: tag.device_id.clone(),
            })?;
            let count = *blocks.get(tag.block_id.as_str()).ok_or_else(|| ConfigError::UnknownBlock {
                tag: tag.id,
                device: tag.device_id.clone(),
                block: tag.block_id.clone(),
            })?;
            validate_tag(tag, count)?;
        }

        Ok(())
    }
}

fn validate_block(device: &str, index: usize, block: &BlockConfig) -> Result<(), ConfigError> {
    if block.id.is_empty() {
        return Err(ConfigError::EmptyBlockId {
            device: device.to_string(),
            index,
        });
    }
    if block.count == 0 || block.count as usize > MAX_WRITE_REGISTERS {
        return Err(ConfigError::BlockCount {
            device: device.to_string(),
            block: block.id.clone(),
            count: block.count,
            max: MAX_WRITE_REGISTERS,
        });
    }
    if block.offset as u32 + block.count as u32 > 65536 {
        return Err(ConfigError::BlockRange {
            device: device.to_string(),
            block: block.id.clone(),
            offset: block.offset,
            count: block.count,
        });
    }
    Ok(())
}

fn validate_tag(tag: &TagConfig, count: u16) -> Result<(), ConfigError> {
    let span = tag.tag_type.width().register_span() as u32;
    if tag.address as u32 + span > count as u32 {
        return Err(ConfigError::TagAddress {
            tag: tag.id,
            address: tag.address,
            tag_type: tag.tag_type,
            count,
        });
    }

    let max_sub = match tag.tag_type {
        TagType::Bit => 15,
        TagType::Byte | TagType::UByte => 1,
        _ => u8::MAX,
    };
    if tag.sub_address > max_sub {
        return Err(ConfigError::TagSubAddress {
            tag: tag.id,
            sub_address: tag.sub_address,
            tag_type: tag.tag_type,
        });
    }

    if tag.multiply == 0.0 {
        return Err(ConfigError::ZeroMultiply(tag.id));
    }
    if tag.tag_type == TagType::Real16 && !matches!(tag.divider, 1 | 10 | 100 | 1000 | 10000) {
        return Err(ConfigError::Divider {
            tag: tag.id,
            divider: tag.divider,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
devices:
  - id: plc1
    ip: 127.0.0.1
    port: 1502
    blocks:
      - { id: b1, offset: 100, count: 10 }
      - { id: b2, offset: 200, count: 4, cycle_time_ms: 0, retries: 1 }
  - id: plc2
    ip: 10.0.0.2
    probe_host: false
    blocks:
      - { id: b1, offset: 0, count: 2 }
tags:
  - { id: 1, name: speed, device_id: plc1, block_id: b1, address: 0, type: uword }
  - { id: 2, name: power, device_id: plc1, block_id: b1, address: 8, type: dword, word_swap: true }
  - { id: 3, name: temp, device_id: plc2, block_id: b1, address: 1, type: real16, divider: 10 }
  - { id: 4, name: run, device_id: plc1, block_id: b2, address: 3, sub_address: 15, type: bit }
"#;

    fn parse(yaml: &str) -> EngineConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_sample_loads_with_defaults() {
        let config = EngineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.tags.len(), 4);

        let plc1 = &config.devices[0];
        assert_eq!(plc1.port, 1502);
        assert_eq!(plc1.unit_id, 1);
        assert_eq!(plc1.response_timeout(), Duration::from_secs(1));
        assert_eq!(plc1.connection_timeout(), Duration::from_secs(3));
        assert!(plc1.probe_host);
        assert!(!plc1.packet_logging);

        let b1 = &plc1.blocks[0];
        assert_eq!(b1.cycle_time(), Duration::from_secs(1));
        assert_eq!(b1.retries, 3);
        assert_eq!(b1.error_sleep(), Duration::from_secs(3));
        assert_eq!(plc1.blocks[1].cycle_time_ms, 0);

        assert_eq!(config.devices[1].port, 502);
        assert!(!config.devices[1].probe_host);

        let speed = &config.tags[0];
        assert_eq!(speed.tag_type, TagType::UWord);
        assert_eq!(speed.multiply, 1.0);
        assert_eq!(speed.add, 0.0);
        assert_eq!(speed.divider, 1);
        assert!(!speed.word_swap);
        assert!(config.tags[1].word_swap);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let yaml = SAMPLE.replace("type: uword", "type: float");
        assert!(matches!(
            EngineConfig::from_yaml_str(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_duplicate_ids() {
        let mut config = parse(SAMPLE);
        config.devices[1].id = "plc1".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateDevice(id)) if id == "plc1"));

        let mut config = parse(SAMPLE);
        config.devices[0].blocks[1].id = "b1".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateBlock { .. })));

        let mut config = parse(SAMPLE);
        config.tags[3].id = 1;
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateTag(1))));
    }

    #[test]
    fn test_empty_ids() {
        let mut config = parse(SAMPLE);
        config.devices[1].id.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDeviceId { index: 1 })));

        let mut config = parse(SAMPLE);
        config.devices[0].blocks[0].id.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyBlockId { index: 0, .. })));
    }

    #[test]
    fn test_block_size_limits() {
        let mut config = parse(SAMPLE);
        config.devices[0].blocks[0].count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::BlockCount { count: 0, .. })));

        let mut config = parse(SAMPLE);
        config.devices[0].blocks[0].count = 124;
        assert!(matches!(config.validate(), Err(ConfigError::BlockCount { count: 124, .. })));

        let mut config = parse(SAMPLE);
        config.devices[0].blocks[0].count = 123;
        assert!(config.validate().is_ok());

        let mut config = parse(SAMPLE);
        config.devices[0].blocks[0].offset = 65530;
        assert!(matches!(config.validate(), Err(ConfigError::BlockRange { .. })));
    }

    #[test]
    fn test_tag_references() {
        let mut config = parse(SAMPLE);
        config.tags[0].device_id = "nowhere".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownDevice { tag: 1, .. })));

        let mut config = parse(SAMPLE);
        config.tags[2].block_id = "b2".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownBlock { tag: 3, .. })));
    }

    #[test]
    fn test_tag_address_bounds() {
        let mut config = parse(SAMPLE);
        config.tags[0].address = 10;
        assert!(matches!(config.validate(), Err(ConfigError::TagAddress { tag: 1, .. })));

        // dword at the last register has no room for its second word
        let mut config = parse(SAMPLE);
        config.tags[1].address = 9;
        assert!(matches!(config.validate(), Err(ConfigError::TagAddress { tag: 2, .. })));
    }

    #[test]
    fn test_tag_sub_address_bounds() {
        let mut config = parse(SAMPLE);
        config.tags[3].sub_address = 16;
        assert!(matches!(config.validate(), Err(ConfigError::TagSubAddress { tag: 4, .. })));

        let mut config = parse(SAMPLE);
        config.tags[0].tag_type = TagType::UByte;
        config.tags[0].sub_address = 2;
        assert!(matches!(config.validate(), Err(ConfigError::TagSubAddress { tag: 1, .. })));

        config.tags[0].sub_address = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scaling_rules() {
        let mut config = parse(SAMPLE);
        config.tags[0].multiply = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMultiply(1))));

        let mut config = parse(SAMPLE);
        config.tags[2].divider = 50;
        assert!(matches!(config.validate(), Err(ConfigError::Divider { tag: 3, divider: 50 })));

        // divider only matters for real16
        let mut config = parse(SAMPLE);
        config.tags[0].divider = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
