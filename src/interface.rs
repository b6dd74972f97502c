//! Capability views onto the driver
//!
//! Collaborators get exactly one of two disjoint views: the data plane used
//! by tags, and the monitoring view used by status reporting.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::block::BlockHealth;
use crate::error::ModbusResult;

/// Typed register access by `(device, block, address)`.
///
/// Reads return the last successful poll of the block. Writes only queue a
/// change; nothing is transmitted until [`DataInterface::do_write`].
pub trait DataInterface: Send + Sync {
    fn read_bit(&self, device_id: &str, block_id: &str, register: u16, bit: u8) -> ModbusResult<bool>;

    fn write_bit(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        bit: u8,
        value: bool,
    ) -> ModbusResult<()>;

    /// `index` 0 is the low byte, anything else the high byte
    fn read_byte(&self, device_id: &str, block_id: &str, register: u16, index: u8) -> ModbusResult<u8>;

    fn write_byte(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        index: u8,
        value: u8,
    ) -> ModbusResult<()>;

    fn read_word(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<u16>;

    fn write_word(&self, device_id: &str, block_id: &str, register: u16, value: u16) -> ModbusResult<()>;

    /// Two consecutive registers taken from the same poll.
    fn read_word_pair(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<[u16; 2]>;

    /// Queue two consecutive registers together; on error neither is queued.
    fn write_word_pair(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        values: [u16; 2],
    ) -> ModbusResult<()>;

    /// Flag every block for write on its next tick. Fire-and-forget.
    fn do_write(&self);
}

/// Session state as shown to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Read-only view of devices and blocks.
pub trait MonitorInterface: Send + Sync {
    fn device_ids(&self) -> Vec<String>;

    fn block_ids(&self, device_id: &str) -> ModbusResult<Vec<String>>;

    fn device_ip(&self, device_id: &str) -> ModbusResult<String>;

    fn device_port(&self, device_id: &str) -> ModbusResult<u16>;

    fn device_unit_id(&self, device_id: &str) -> ModbusResult<u8>;

    fn device_response_timeout(&self, device_id: &str) -> ModbusResult<Duration>;

    fn device_connection_timeout(&self, device_id: &str) -> ModbusResult<Duration>;

    /// Waits for the device connection lock, so it may take as long as an
    /// in-flight connect.
    fn connection_status(
        &self,
        device_id: &str,
    ) -> impl Future<Output = ModbusResult<ConnectionStatus>> + Send;

    fn block_offset(&self, device_id: &str, block_id: &str) -> ModbusResult<u16>;

    fn block_count(&self, device_id: &str, block_id: &str) -> ModbusResult<u16>;

    fn block_cycle_time(&self, device_id: &str, block_id: &str) -> ModbusResult<Duration>;

    fn block_retries(&self, device_id: &str, block_id: &str) -> ModbusResult<u32>;

    fn block_error_sleep(&self, device_id: &str, block_id: &str) -> ModbusResult<Duration>;

    /// Block health; its `as_str()` is the block error string.
    fn block_error(&self, device_id: &str, block_id: &str) -> ModbusResult<BlockHealth>;
}
