//! Protocol limits and engine timing constants
//!
//! Frame limits follow the Modbus application protocol: the PDU is capped at
//! 253 bytes, which in turn bounds how many registers one request may carry.

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header bytes preceding the unit id:
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size: RS485 ADU (256) - address (1) - CRC (2)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Buffer reserved per session for one complete TCP frame (6 + 254 = 260)
pub const MODBUS_FRAME_BUFFER_SIZE: usize = MBAP_HEADER_LEN + MAX_MBAP_LENGTH;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers per FC03 request.
///
/// Response PDU: FC(1) + byte count(1) + N*2 <= 253, so N <= 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum registers per FC16 request.
///
/// Request PDU: FC(1) + address(2) + quantity(2) + byte count(1) + N*2 <= 253,
/// so N <= 123. A block is always written whole, so this also caps block size.
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Exception responses echo the function code with the high bit set
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Engine Timing
// ============================================================================

/// Block worker tick
pub const TICK: Duration = Duration::from_millis(50);

/// Shortest wait handed to the reachability probe
pub const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Tag synchronizer cycle
pub const SYNC_CYCLE: Duration = Duration::from_millis(50);

/// Synchronizer cycles between two heartbeats
pub const HEARTBEAT_CYCLES: u32 = 60;

// ============================================================================
// Configuration Defaults
// ============================================================================

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_CYCLE_TIME_MS: u64 = 1000;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_ERROR_SLEEP_MS: u64 = 3000;
