//! Modbus TCP master session
//!
//! One [`MasterConnection`] exists per device and is shared by every block
//! of that device behind the device's connection lock. Blocks are generic
//! over the trait, so the polling state machine can be driven by a scripted
//! connection in tests.
//!
//! # Connection State
//!
//! [`MasterConnection::is_connected`] reports the flag last set by
//! `connect`/`disconnect`. It is not a live probe: a peer that silently went
//! away is only noticed by the next failing request.
//!
//! # Example
//!
//! ```rust,no_run
//! use modbus_engine::{MasterConnection, ModbusResult, TcpMasterConnection};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut conn = TcpMasterConnection::new(
//!         "192.168.1.10",
//!         502,
//!         1,
//!         Duration::from_millis(1000),
//!         Duration::from_millis(3000),
//!     )?;
//!
//!     conn.connect().await?;
//!     let registers = conn.read_holding_registers(0, 10).await?;
//!     conn.write_multiple_registers(0, &registers).await?;
//!     conn.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::pdu::PduBuilder;
use crate::probe::HostProbe;
use crate::transport::{TcpTransport, TransportStats};

/// Master side of one Modbus session.
///
/// Only FC03 and FC16 are modeled. Failures use the closed kind set of
/// [`ModbusError`]; wire exception codes are mapped through
/// [`ModbusError::from_exception_code`].
pub trait MasterConnection: Send + 'static {
    /// Probe the host, then open the session.
    ///
    /// Fails with `host_not_reachable` when the probe gets no reply and with
    /// `connection_failed` when the TCP session cannot be opened.
    fn connect(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Close the session. Idempotent.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Discard any buffered partial frame.
    fn flush(&mut self);

    /// Cached connection flag.
    fn is_connected(&self) -> bool;

    /// Read `count` holding registers starting at `offset` (FC03).
    fn read_holding_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write `values` to consecutive holding registers starting at `offset` (FC16).
    fn write_multiple_registers(
        &mut self,
        offset: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send;
}

/// Modbus TCP master connection.
#[derive(Debug)]
pub struct TcpMasterConnection {
    ip: String,
    port: u16,
    unit_id: u8,
    response_timeout: Duration,
    connection_timeout: Duration,
    probe: HostProbe,
    transport: TcpTransport,
    connected: bool,
}

impl TcpMasterConnection {
    /// Create a disconnected session. Fails with `no_enough_memory` if the
    /// frame buffer cannot be reserved.
    pub fn new(
        ip: &str,
        port: u16,
        unit_id: u8,
        response_timeout: Duration,
        connection_timeout: Duration,
    ) -> ModbusResult<Self> {
        let transport = TcpTransport::new(ip, port, unit_id, response_timeout)?;
        Ok(Self {
            ip: ip.to_string(),
            port,
            unit_id,
            response_timeout,
            connection_timeout,
            probe: HostProbe::default(),
            transport,
            connected: false,
        })
    }

    /// Replace the reachability probe used by `connect`.
    pub fn with_probe(mut self, probe: HostProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport.set_packet_logging(enabled);
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }
}

impl MasterConnection for TcpMasterConnection {
    async fn connect(&mut self) -> ModbusResult<()> {
        if self.connected {
            return Ok(());
        }

        if !self.probe.is_reachable(&self.ip, self.connection_timeout).await {
            debug!("{} did not answer the reachability probe", self.ip);
            return Err(ModbusError::HostNotReachable);
        }

        self.transport.open(self.connection_timeout).await?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.transport.close().await;
        self.connected = false;
    }

    fn flush(&mut self) {
        self.transport.discard_pending();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let request = PduBuilder::build_read_holding_registers(offset, count)?;
        let response = self.transport.request(&request).await?;
        response.parse_read_registers(count).inspect_err(|e| {
            warn!(
                "FC03 {}:{} unit={} offset={} count={} failed: {}",
                self.ip,
                self.port,
                self.unit_id,
                offset,
                count,
                e.as_str()
            );
        })
    }

    async fn write_multiple_registers(&mut self, offset: u16, values: &[u16]) -> ModbusResult<()> {
        let request = PduBuilder::build_write_multiple_registers(offset, values)?;
        let response = self.transport.request(&request).await?;
        response
            .parse_write_registers(offset, values.len() as u16)
            .inspect_err(|e| {
                warn!(
                    "FC16 {}:{} unit={} offset={} count={} failed: {}",
                    self.ip,
                    self.port,
                    self.unit_id,
                    offset,
                    values.len(),
                    e.as_str()
                );
            })
    }
}
