//! Point-in-time status of every device and block, built from the
//! monitoring view only.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ModbusResult;
use crate::interface::{ConnectionStatus, MonitorInterface};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockStatus {
    pub id: String,
    pub offset: u16,
    pub count: u16,
    pub cycle_time_ms: u64,
    pub retries: u32,
    pub error_sleep_ms: u64,
    /// `no_error`, `error_init` or the failing error kind
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub unit_id: u8,
    pub response_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub connection: ConnectionStatus,
    pub blocks: Vec<BlockStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<DeviceStatus>,
}

impl StatusReport {
    pub async fn collect<M: MonitorInterface + ?Sized>(monitor: &M) -> ModbusResult<Self> {
        let mut devices = Vec::new();
        for device_id in monitor.device_ids() {
            devices.push(collect_device(monitor, &device_id).await?);
        }
        Ok(Self {
            timestamp: Utc::now(),
            devices,
        })
    }

    /// Blocks whose last cycle did not succeed, as `(device, block, error)`.
    pub fn faulted_blocks(&self) -> Vec<(&str, &str, &str)> {
        self.devices
            .iter()
            .flat_map(|device| {
                device
                    .blocks
                    .iter()
                    .filter(|block| block.error != "no_error")
                    .map(move |block| (device.id.as_str(), block.id.as_str(), block.error.as_str()))
            })
            .collect()
    }
}

async fn collect_device<M: MonitorInterface + ?Sized>(monitor: &M, id: &str) -> ModbusResult<DeviceStatus> {
    let mut blocks = Vec::new();
    for block_id in monitor.block_ids(id)? {
        blocks.push(BlockStatus {
            offset: monitor.block_offset(id, &block_id)?,
            count: monitor.block_count(id, &block_id)?,
            cycle_time_ms: monitor.block_cycle_time(id, &block_id)?.as_millis() as u64,
            retries: monitor.block_retries(id, &block_id)?,
            error_sleep_ms: monitor.block_error_sleep(id, &block_id)?.as_millis() as u64,
            error: monitor.block_error(id, &block_id)?.as_str().to_string(),
            id: block_id,
        });
    }

    Ok(DeviceStatus {
        id: id.to_string(),
        ip: monitor.device_ip(id)?,
        port: monitor.device_port(id)?,
        unit_id: monitor.device_unit_id(id)?,
        response_timeout_ms: monitor.device_response_timeout(id)?.as_millis() as u64,
        connection_timeout_ms: monitor.device_connection_timeout(id)?.as_millis() as u64,
        connection: monitor.connection_status(id).await?,
        blocks,
    })
}
