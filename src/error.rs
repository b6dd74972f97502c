//! # Error Types
//!
//! Closed set of error kinds produced by the engine. Every kind carries a
//! stable snake_case name that is surfaced verbatim as a block error string
//! and as tag validity, so the names are part of the public contract.
//!
//! | Group | Kinds |
//! |-------|-------|
//! | Resource | `no_enough_memory` |
//! | Connectivity | `host_not_reachable`, `connection_failed` |
//! | Protocol | `illegal_function_code` .. `undefined_exception` |
//! | Addressing | `bad_register`, `bad_bit_number`, `bad_block`, `bad_device` |
//! | Staleness | `block_error` |

use thiserror::Error;

use crate::constants::{
    EXCEPTION_ACKNOWLEDGE, EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
    EXCEPTION_GATEWAY_TARGET_FAILED, EXCEPTION_ILLEGAL_DATA_ADDRESS,
    EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION, EXCEPTION_SERVER_DEVICE_BUSY,
    EXCEPTION_SERVER_DEVICE_FAILURE,
};

/// Result alias used across the engine.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Engine error kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusError {
    #[error("session buffers could not be allocated")]
    NoEnoughMemory,

    #[error("host is not reachable")]
    HostNotReachable,

    #[error("TCP connection failed")]
    ConnectionFailed,

    #[error("illegal function code")]
    IllegalFunctionCode,

    #[error("illegal data address")]
    IllegalDataAddress,

    #[error("illegal data value")]
    IllegalDataValue,

    #[error("server device failure")]
    ServerFail,

    #[error("acknowledge")]
    ErrorAck,

    #[error("server device busy")]
    ServerBusy,

    #[error("gateway path unavailable")]
    GatewayPathException,

    #[error("gateway target device failed to respond")]
    GatewayRespondException,

    #[error("too many data")]
    TooManyData,

    #[error("undefined exception")]
    UndefinedException,

    #[error("register index out of block range")]
    BadRegister,

    #[error("bit number out of range")]
    BadBitNumber,

    #[error("unknown block")]
    BadBlock,

    #[error("unknown device")]
    BadDevice,

    #[error("block data is not valid")]
    BlockError,
}

impl ModbusError {
    /// Map a Modbus exception code from the wire.
    ///
    /// Codes outside the standard set collapse to
    /// [`ModbusError::UndefinedException`].
    pub fn from_exception_code(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => Self::IllegalFunctionCode,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Self::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => Self::IllegalDataValue,
            EXCEPTION_SERVER_DEVICE_FAILURE => Self::ServerFail,
            EXCEPTION_ACKNOWLEDGE => Self::ErrorAck,
            EXCEPTION_SERVER_DEVICE_BUSY => Self::ServerBusy,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Self::GatewayPathException,
            EXCEPTION_GATEWAY_TARGET_FAILED => Self::GatewayRespondException,
            _ => Self::UndefinedException,
        }
    }

    /// Stable kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEnoughMemory => "no_enough_memory",
            Self::HostNotReachable => "host_not_reachable",
            Self::ConnectionFailed => "connection_failed",
            Self::IllegalFunctionCode => "illegal_function_code",
            Self::IllegalDataAddress => "illegal_data_address",
            Self::IllegalDataValue => "illegal_data_value",
            Self::ServerFail => "server_fail",
            Self::ErrorAck => "error_ack",
            Self::ServerBusy => "server_busy",
            Self::GatewayPathException => "gateway_path_exception",
            Self::GatewayRespondException => "gateway_respond_exception",
            Self::TooManyData => "too_many_data",
            Self::UndefinedException => "undefined_exception",
            Self::BadRegister => "bad_register",
            Self::BadBitNumber => "bad_bit_number",
            Self::BadBlock => "bad_block",
            Self::BadDevice => "bad_device",
            Self::BlockError => "block_error",
        }
    }

    /// Faults after which the shared session cannot be trusted and must be
    /// re-established.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::ServerFail
                | Self::GatewayPathException
                | Self::GatewayRespondException
                | Self::UndefinedException
        )
    }

    /// Wire-level Modbus exception (as opposed to connectivity or addressing).
    pub fn is_protocol_exception(&self) -> bool {
        matches!(
            self,
            Self::IllegalFunctionCode
                | Self::IllegalDataAddress
                | Self::IllegalDataValue
                | Self::ServerFail
                | Self::ErrorAck
                | Self::ServerBusy
                | Self::GatewayPathException
                | Self::GatewayRespondException
                | Self::TooManyData
                | Self::UndefinedException
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_mapping() {
        assert_eq!(ModbusError::from_exception_code(0x01), ModbusError::IllegalFunctionCode);
        assert_eq!(ModbusError::from_exception_code(0x02), ModbusError::IllegalDataAddress);
        assert_eq!(ModbusError::from_exception_code(0x03), ModbusError::IllegalDataValue);
        assert_eq!(ModbusError::from_exception_code(0x04), ModbusError::ServerFail);
        assert_eq!(ModbusError::from_exception_code(0x05), ModbusError::ErrorAck);
        assert_eq!(ModbusError::from_exception_code(0x06), ModbusError::ServerBusy);
        assert_eq!(ModbusError::from_exception_code(0x0A), ModbusError::GatewayPathException);
        assert_eq!(ModbusError::from_exception_code(0x0B), ModbusError::GatewayRespondException);
    }

    #[test]
    fn test_unknown_exception_code_is_undefined() {
        for code in [0x00, 0x07, 0x08, 0x09, 0x0C, 0x7F, 0xFF] {
            assert_eq!(
                ModbusError::from_exception_code(code),
                ModbusError::UndefinedException
            );
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ModbusError::NoEnoughMemory.as_str(), "no_enough_memory");
        assert_eq!(ModbusError::HostNotReachable.as_str(), "host_not_reachable");
        assert_eq!(ModbusError::ErrorAck.as_str(), "error_ack");
        assert_eq!(ModbusError::TooManyData.as_str(), "too_many_data");
        assert_eq!(ModbusError::BlockError.as_str(), "block_error");
    }

    #[test]
    fn test_reconnect_subset() {
        assert!(ModbusError::ServerFail.requires_reconnect());
        assert!(ModbusError::GatewayPathException.requires_reconnect());
        assert!(ModbusError::GatewayRespondException.requires_reconnect());
        assert!(ModbusError::UndefinedException.requires_reconnect());

        assert!(!ModbusError::IllegalDataAddress.requires_reconnect());
        assert!(!ModbusError::ServerBusy.requires_reconnect());
        assert!(!ModbusError::ErrorAck.requires_reconnect());
        assert!(!ModbusError::TooManyData.requires_reconnect());
        assert!(!ModbusError::HostNotReachable.requires_reconnect());
    }

    #[test]
    fn test_protocol_exception_group() {
        assert!(ModbusError::ServerBusy.is_protocol_exception());
        assert!(!ModbusError::ConnectionFailed.is_protocol_exception());
        assert!(!ModbusError::BadRegister.is_protocol_exception());
    }
}
