//! Driver: the set of configured devices behind the two capability views
//!
//! The driver implements [`DataInterface`] for tags and [`MonitorInterface`]
//! for status reporting, resolving `(device, block)` ids with `bad_device`
//! and `bad_block` failures. [`Driver::start`] launches the block workers.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block::{Block, BlockHealth};
use crate::config::DeviceConfig;
use crate::connection::{MasterConnection, TcpMasterConnection};
use crate::device::Device;
use crate::error::{ModbusError, ModbusResult};
use crate::interface::{ConnectionStatus, DataInterface, MonitorInterface};

#[derive(Debug)]
pub struct Driver<C: MasterConnection = TcpMasterConnection> {
    devices: BTreeMap<String, Device<C>>,
}

impl Driver<TcpMasterConnection> {
    /// Build TCP sessions for every configured device. No I/O happens until
    /// the workers start.
    pub fn from_config(devices: &[DeviceConfig]) -> ModbusResult<Self> {
        let devices = devices
            .iter()
            .map(|config| {
                let device = Device::from_config(config.clone())?;
                Ok((config.id.clone(), device))
            })
            .collect::<ModbusResult<_>>()?;
        Ok(Self { devices })
    }
}

impl<C: MasterConnection> Driver<C> {
    /// Build devices over connections produced by `factory`.
    pub fn with_connections<F>(devices: &[DeviceConfig], mut factory: F) -> Self
    where
        F: FnMut(&DeviceConfig) -> C,
    {
        let devices = devices
            .iter()
            .map(|config| (config.id.clone(), Device::new(config.clone(), factory(config))))
            .collect();
        Self { devices }
    }

    pub fn device(&self, device_id: &str) -> ModbusResult<&Device<C>> {
        self.devices.get(device_id).ok_or(ModbusError::BadDevice)
    }

    pub fn block(&self, device_id: &str, block_id: &str) -> ModbusResult<&Block<C>> {
        self.device(device_id)?.block(block_id).map(|block| block.as_ref())
    }

    /// Spawn one worker per block of every device.
    pub fn start(&self) -> DriverTasks {
        let cancel = CancellationToken::new();
        let handles: Vec<_> = self
            .devices
            .values()
            .flat_map(|device| device.spawn(&cancel))
            .collect();
        info!(
            "Started {} block workers on {} devices",
            handles.len(),
            self.devices.len()
        );
        DriverTasks { cancel, handles }
    }

    /// Stop the workers, then close every device session.
    pub async fn shutdown(&self, tasks: DriverTasks) {
        tasks.stop().await;
        for device in self.devices.values() {
            device.disconnect().await;
        }
        info!("Driver stopped");
    }
}

/// Handles of the running block workers.
#[derive(Debug)]
pub struct DriverTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DriverTasks {
    /// Token the workers watch; cancelling it stops them at their next tick.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel and wait for every worker.
    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Block worker ended abnormally: {}", e);
            }
        }
    }
}

impl<C: MasterConnection> DataInterface for Driver<C> {
    fn read_bit(&self, device_id: &str, block_id: &str, register: u16, bit: u8) -> ModbusResult<bool> {
        self.block(device_id, block_id)?.read_bit(register, bit)
    }

    fn write_bit(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        bit: u8,
        value: bool,
    ) -> ModbusResult<()> {
        self.block(device_id, block_id)?.write_bit(register, bit, value)
    }

    fn read_byte(&self, device_id: &str, block_id: &str, register: u16, index: u8) -> ModbusResult<u8> {
        self.block(device_id, block_id)?.read_byte(register, index)
    }

    fn write_byte(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        index: u8,
        value: u8,
    ) -> ModbusResult<()> {
        self.block(device_id, block_id)?.write_byte(register, index, value)
    }

    fn read_word(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<u16> {
        self.block(device_id, block_id)?.read_word(register)
    }

    fn write_word(&self, device_id: &str, block_id: &str, register: u16, value: u16) -> ModbusResult<()> {
        self.block(device_id, block_id)?.write_word(register, value)
    }

    fn read_word_pair(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<[u16; 2]> {
        self.block(device_id, block_id)?.read_word_pair(register)
    }

    fn write_word_pair(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        values: [u16; 2],
    ) -> ModbusResult<()> {
        self.block(device_id, block_id)?.write_word_pair(register, values)
    }

    fn do_write(&self) {
        for device in self.devices.values() {
            device.request_write();
        }
    }
}

impl<C: MasterConnection> MonitorInterface for Driver<C> {
    fn device_ids(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    fn block_ids(&self, device_id: &str) -> ModbusResult<Vec<String>> {
        Ok(self.device(device_id)?.block_ids())
    }

    fn device_ip(&self, device_id: &str) -> ModbusResult<String> {
        Ok(self.device(device_id)?.ip().to_string())
    }

    fn device_port(&self, device_id: &str) -> ModbusResult<u16> {
        Ok(self.device(device_id)?.port())
    }

    fn device_unit_id(&self, device_id: &str) -> ModbusResult<u8> {
        Ok(self.device(device_id)?.unit_id())
    }

    fn device_response_timeout(&self, device_id: &str) -> ModbusResult<Duration> {
        Ok(self.device(device_id)?.response_timeout())
    }

    fn device_connection_timeout(&self, device_id: &str) -> ModbusResult<Duration> {
        Ok(self.device(device_id)?.connection_timeout())
    }

    async fn connection_status(&self, device_id: &str) -> ModbusResult<ConnectionStatus> {
        Ok(self.device(device_id)?.connection_status().await)
    }

    fn block_offset(&self, device_id: &str, block_id: &str) -> ModbusResult<u16> {
        Ok(self.block(device_id, block_id)?.offset())
    }

    fn block_count(&self, device_id: &str, block_id: &str) -> ModbusResult<u16> {
        Ok(self.block(device_id, block_id)?.count())
    }

    fn block_cycle_time(&self, device_id: &str, block_id: &str) -> ModbusResult<Duration> {
        Ok(self.block(device_id, block_id)?.cycle_time())
    }

    fn block_retries(&self, device_id: &str, block_id: &str) -> ModbusResult<u32> {
        Ok(self.block(device_id, block_id)?.retries())
    }

    fn block_error_sleep(&self, device_id: &str, block_id: &str) -> ModbusResult<Duration> {
        Ok(self.block(device_id, block_id)?.error_sleep())
    }

    fn block_error(&self, device_id: &str, block_id: &str) -> ModbusResult<BlockHealth> {
        Ok(self.block(device_id, block_id)?.health())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockConfig;
    use crate::testing::{block_config, MockConnection};
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    fn block(id: &str, offset: u16, count: u16) -> BlockConfig {
        let mut config = block_config(id, offset, count);
        config.error_sleep_ms = 100;
        config
    }

    fn configs() -> Vec<DeviceConfig> {
        let device = |id: &str, blocks: Vec<_>| DeviceConfig {
            id: id.to_string(),
            ip: format!("10.0.0.{}", id.len()),
            port: 502,
            unit_id: 1,
            response_timeout_ms: 1000,
            connection_timeout_ms: 3000,
            probe_host: false,
            packet_logging: false,
            blocks,
        };
        vec![
            device("plc", vec![block("b1", 0, 4), block("b2", 10, 2)]),
            device("meter", vec![block("m1", 100, 3)]),
        ]
    }

    fn driver() -> (Driver<MockConnection>, HashMap<String, MockConnection>) {
        let mut conns = HashMap::new();
        let driver = Driver::with_connections(&configs(), |config| {
            let conn = MockConnection::disconnected((0..200).collect());
            conns.insert(config.id.clone(), conn.clone());
            conn
        });
        (driver, conns)
    }

    #[test]
    fn test_lookup_errors() {
        let (driver, _) = driver();
        assert_eq!(driver.read_word("nope", "b1", 0).unwrap_err(), ModbusError::BadDevice);
        assert_eq!(driver.read_word("plc", "m1", 0).unwrap_err(), ModbusError::BadBlock);
        // unknown ids win over bad registers
        assert_eq!(driver.read_word("plc", "nope", 99).unwrap_err(), ModbusError::BadBlock);
        assert_eq!(driver.block_ids("nope").unwrap_err(), ModbusError::BadDevice);
        assert_err!(driver.block_offset("meter", "b1"));
        assert_ok!(driver.block_offset("meter", "m1"));
    }

    #[test]
    fn test_data_plane_before_first_read() {
        let (driver, _) = driver();
        assert_eq!(driver.read_word("plc", "b1", 4).unwrap_err(), ModbusError::BadRegister);
        assert_eq!(driver.read_bit("plc", "b1", 0, 16).unwrap_err(), ModbusError::BadBitNumber);
        assert_eq!(driver.read_word("plc", "b1", 0).unwrap_err(), ModbusError::BlockError);
        assert_eq!(
            driver.write_byte("plc", "b1", 0, 1, 5).unwrap_err(),
            ModbusError::BlockError
        );
    }

    #[tokio::test]
    async fn test_monitor_view() {
        let (driver, _) = driver();
        assert_eq!(driver.device_ids(), vec!["meter", "plc"]);
        assert_eq!(driver.block_ids("plc").unwrap(), vec!["b1", "b2"]);
        assert_eq!(driver.device_ip("plc").unwrap(), "10.0.0.3");
        assert_eq!(driver.device_port("meter").unwrap(), 502);
        assert_eq!(driver.device_unit_id("meter").unwrap(), 1);
        assert_eq!(driver.device_response_timeout("plc").unwrap(), Duration::from_secs(1));
        assert_eq!(driver.device_connection_timeout("plc").unwrap(), Duration::from_secs(3));
        assert_eq!(
            driver.connection_status("plc").await.unwrap(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(driver.block_offset("plc", "b2").unwrap(), 10);
        assert_eq!(driver.block_count("plc", "b2").unwrap(), 2);
        assert_eq!(driver.block_cycle_time("meter", "m1").unwrap(), Duration::from_secs(1));
        assert_eq!(driver.block_retries("meter", "m1").unwrap(), 3);
        assert_eq!(driver.block_error_sleep("meter", "m1").unwrap(), Duration::from_millis(100));
        assert_eq!(driver.block_error("plc", "b1").unwrap().as_str(), "error_init");
        assert!(driver.connection_status("nope").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_poll_write_shutdown() {
        let (driver, conns) = driver();
        let tasks = driver.start();
        assert_eq!(tasks.len(), 3);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(driver.read_word("plc", "b2", 1).unwrap(), 11);
        assert_eq!(driver.read_word("meter", "m1", 2).unwrap(), 102);
        assert_eq!(driver.block_error("plc", "b2").unwrap().as_str(), "no_error");

        assert_ok!(driver.write_bit("plc", "b1", 0, 15, true));
        driver.do_write();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(conns["plc"].writes(), vec![(0, vec![0x8000, 1, 2, 3])]);
        assert_eq!(driver.read_word("plc", "b1", 0).unwrap(), 0x8000);
        assert!(conns["meter"].writes().is_empty());

        driver.shutdown(tasks).await;
        assert_eq!(
            driver.connection_status("plc").await.unwrap(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(conns["plc"].disconnect_calls(), 1);
        assert_eq!(conns["meter"].disconnect_calls(), 1);
    }
}
