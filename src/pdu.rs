//! Modbus PDU data structure
//!
//! Fixed-size stack array holding one request or response PDU, plus the
//! builders and parsers for the two function codes the engine speaks.

use tracing::{debug, warn};

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_PDU_SIZE,
    MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            warn!("PDU too large: {} bytes (max {})", data.len(), MAX_PDU_SIZE);
            return Err(ModbusError::TooManyData);
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            if pdu.is_exception() {
                debug!(
                    "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                    fc,
                    Self::function_code_description(fc),
                    pdu.exception_code().unwrap_or(0)
                );
            } else {
                debug!(
                    "PDU parsed: FC={:02X} ({}), data_len={}",
                    fc,
                    Self::function_code_description(fc),
                    pdu.len - 1
                );
            }
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::TooManyData);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
            _ => "Unsupported Function",
        }
    }

    /// Fail with the mapped error kind if this is an exception response for
    /// `expected_fc`, or if the function code does not match at all.
    fn check_function(&self, expected_fc: u8) -> ModbusResult<()> {
        match self.function_code() {
            Some(fc) if fc == expected_fc => Ok(()),
            Some(fc) if fc == expected_fc | EXCEPTION_FLAG => {
                let code = self.exception_code().unwrap_or(0);
                let err = ModbusError::from_exception_code(code);
                warn!(
                    "Exception response to {}: code={:02X} ({})",
                    Self::function_code_description(expected_fc),
                    code,
                    err.as_str()
                );
                Err(err)
            }
            Some(fc) => {
                warn!("Unexpected function code {:02X}, expected {:02X}", fc, expected_fc);
                Err(ModbusError::UndefinedException)
            }
            None => {
                warn!("Empty response PDU");
                Err(ModbusError::UndefinedException)
            }
        }
    }

    /// Parse an FC03 response carrying exactly `quantity` registers.
    pub fn parse_read_registers(&self, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.check_function(FC_READ_HOLDING_REGISTERS)?;

        let data = self.as_slice();
        if data.len() < 2 {
            warn!("FC03 response truncated: {} bytes", data.len());
            return Err(ModbusError::UndefinedException);
        }
        let byte_count = data[1] as usize;
        let expected = quantity as usize * 2;
        if byte_count != expected || data.len() != 2 + byte_count {
            warn!(
                "FC03 response length mismatch: byte_count={}, payload={}, expected={}",
                byte_count,
                data.len() - 2,
                expected
            );
            return Err(ModbusError::UndefinedException);
        }

        Ok(data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Parse an FC16 response echoing `address` and `quantity`.
    pub fn parse_write_registers(&self, address: u16, quantity: u16) -> ModbusResult<()> {
        self.check_function(FC_WRITE_MULTIPLE_REGISTERS)?;

        let data = self.as_slice();
        if data.len() != 5 {
            warn!("FC16 response has {} bytes, expected 5", data.len());
            return Err(ModbusError::UndefinedException);
        }
        let echoed_address = u16::from_be_bytes([data[1], data[2]]);
        let echoed_quantity = u16::from_be_bytes([data[3], data[4]]);
        if echoed_address != address || echoed_quantity != quantity {
            warn!(
                "FC16 echo mismatch: address={} quantity={}, expected {} / {}",
                echoed_address, echoed_quantity, address, quantity
            );
            return Err(ModbusError::UndefinedException);
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn word(mut self, value: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Build an FC03 request
    pub fn build_read_holding_registers(address: u16, quantity: u16) -> ModbusResult<ModbusPdu> {
        if quantity as usize > MAX_READ_REGISTERS {
            return Err(ModbusError::TooManyData);
        }
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .word(address)?
            .word(quantity)?
            .build())
    }

    /// Build an FC16 request
    pub fn build_write_multiple_registers(address: u16, values: &[u16]) -> ModbusResult<ModbusPdu> {
        if values.len() > MAX_WRITE_REGISTERS {
            return Err(ModbusError::TooManyData);
        }

        let mut builder = PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .word(address)?
            .word(values.len() as u16)?
            .byte((values.len() * 2) as u8)?;

        for &value in values {
            builder = builder.word(value)?;
        }

        Ok(builder.build())
    }
}
