//! Device: one Modbus TCP endpoint and the blocks polled over its session
//!
//! All blocks of a device share a single [`MasterConnection`]. The first
//! block in configuration order starts with the master role, so it is the
//! one that opens the session on startup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::block::{Block, SharedConnection};
use crate::config::DeviceConfig;
use crate::connection::{MasterConnection, TcpMasterConnection};
use crate::error::{ModbusError, ModbusResult};
use crate::interface::ConnectionStatus;
use crate::probe::HostProbe;
use crate::worker::BlockWorker;

#[derive(Debug)]
pub struct Device<C: MasterConnection = TcpMasterConnection> {
    config: DeviceConfig,
    connection: SharedConnection<C>,
    blocks: BTreeMap<String, Arc<Block<C>>>,
}

impl Device<TcpMasterConnection> {
    /// Build the TCP session described by `config`.
    pub fn from_config(config: DeviceConfig) -> ModbusResult<Self> {
        let mut connection = TcpMasterConnection::new(
            &config.ip,
            config.port,
            config.unit_id,
            config.response_timeout(),
            config.connection_timeout(),
        )?
        .with_probe(HostProbe::from_enabled(config.probe_host));
        connection.set_packet_logging(config.packet_logging);
        Ok(Self::new(config, connection))
    }
}

impl<C: MasterConnection> Device<C> {
    pub fn new(config: DeviceConfig, connection: C) -> Self {
        let connection = Arc::new(AsyncMutex::new(connection));
        let blocks = config
            .blocks
            .iter()
            .enumerate()
            .map(|(index, block)| {
                let block = Block::new(block.clone(), connection.clone(), index == 0);
                (block.id().to_string(), Arc::new(block))
            })
            .collect();

        Self {
            config,
            connection,
            blocks,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn ip(&self) -> &str {
        &self.config.ip
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    pub fn response_timeout(&self) -> Duration {
        self.config.response_timeout()
    }

    pub fn connection_timeout(&self) -> Duration {
        self.config.connection_timeout()
    }

    /// Block ids in sorted order.
    pub fn block_ids(&self) -> Vec<String> {
        self.blocks.keys().cloned().collect()
    }

    pub fn block(&self, block_id: &str) -> ModbusResult<&Arc<Block<C>>> {
        self.blocks.get(block_id).ok_or(ModbusError::BadBlock)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block<C>>> {
        self.blocks.values()
    }

    /// Flag every block for write.
    pub fn request_write(&self) {
        for block in self.blocks.values() {
            block.request_write();
        }
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::from_connected(self.connection.lock().await.is_connected())
    }

    /// Start one worker per block.
    pub fn spawn(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.blocks
            .values()
            .map(|block| tokio::spawn(BlockWorker::new(block.clone()).run(cancel.clone())))
            .collect()
    }

    pub async fn disconnect(&self) {
        let mut conn = self.connection.lock().await;
        if conn.is_connected() {
            conn.disconnect().await;
            info!("Device {} disconnected", self.config.id);
        }
    }
}
