//! # Modbus Engine - Block-Polling Modbus TCP Master
//!
//! Polls contiguous holding-register ranges ("blocks") from Modbus TCP
//! devices, keeps the last good read of each block in memory, and merges
//! bit, byte and word writes into whole-block write requests. Scaled,
//! typed tags sit on top of the blocks.
//!
//! ## Features
//!
//! - **One Session per Device**: every block of a device shares a single
//!   TCP connection; a master block takes care of reconnecting
//! - **Write Merging**: sub-register writes are queued and applied onto the
//!   last read snapshot, then sent as one FC16 request
//! - **Bounded Retries**: failed writes are retried `retries + 1` times,
//!   failed reads forever, with an error pause in between
//! - **Typed Tags**: bit, byte, word, dword and fixed-point values with
//!   linear scaling
//! - **Graceful Shutdown**: workers stop on a cancellation token
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master |
//! |------|----------|--------|
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_engine::{DataInterface, Driver, EngineConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load("engine.yaml")?;
//!     let driver = Driver::from_config(&config.devices)?;
//!     let tasks = driver.start();
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     println!("register 0: {:?}", driver.read_word("plc1", "inputs", 0));
//!
//!     driver.write_bit("plc1", "inputs", 2, 4, true)?;
//!     driver.do_write();
//!
//!     driver.shutdown(tasks).await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Protocol
// ============================================================================

/// Error kinds shared by the whole engine
pub mod error;

/// Protocol limits, timing and configuration defaults
pub mod constants;

/// Stack-allocated PDU and request builders
pub mod pdu;

/// MBAP framing over TCP
pub mod transport;

/// Ping-based reachability check
pub mod probe;

/// Device session used by blocks
pub mod connection;

// ============================================================================
// Engine
// ============================================================================

/// YAML configuration and validation
pub mod config;

/// Register bit, byte and word helpers
pub mod bytes;

/// Block state, accessors and read/write cycles
pub mod block;

/// Per-block polling task
pub mod worker;

/// Device: shared session plus its blocks
pub mod device;

/// Capability views handed to collaborators
pub mod interface;

/// Device set implementing both capability views
pub mod driver;

// ============================================================================
// Tags
// ============================================================================

/// Raw register values
pub mod value;

/// Per-type decode/encode
pub mod codec;

/// Configured tags
pub mod tag;

/// Tag polling and write dispatch
pub mod sync;

/// Monitoring snapshot
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use modbus_engine::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Configuration ===
pub use config::{BlockConfig, ConfigError, DeviceConfig, EngineConfig, TagConfig};

// === Engine ===
pub use block::{Block, BlockHealth, WriteItem};
pub use connection::{MasterConnection, TcpMasterConnection};
pub use device::Device;
pub use driver::{Driver, DriverTasks};
pub use interface::{ConnectionStatus, DataInterface, MonitorInterface};
pub use probe::HostProbe;
pub use worker::BlockWorker;

// === Tags ===
pub use bytes::{regs_to_u32, u32_to_regs, WordOrder};
pub use codec::{Scaling, TagType};
pub use tag::{Tag, Validity};
pub use value::RawValue;
pub use sync::{LogSink, TagSink, TagSynchronizer, TagUpdate, WriteRequest};
pub use status::StatusReport;

// === Monitoring ===
pub use transport::{TcpTransport, TransportStats};

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
