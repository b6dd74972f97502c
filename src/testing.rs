//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bytes::{reg_bit, reg_byte, with_bit, with_byte};
use crate::config::BlockConfig;
use crate::connection::MasterConnection;
use crate::error::{ModbusError, ModbusResult};
use crate::interface::DataInterface;

pub(crate) fn block_config(id: &str, offset: u16, count: u16) -> BlockConfig {
    BlockConfig {
        id: id.to_string(),
        offset,
        count,
        cycle_time_ms: 1000,
        retries: 3,
        error_sleep_ms: 3000,
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    memory: Vec<u16>,
    connect_error: Option<ModbusError>,
    read_errors: VecDeque<ModbusError>,
    write_errors: VecDeque<ModbusError>,
    always_fail_writes: Option<ModbusError>,
    write_delay: Duration,
    connect_calls: usize,
    disconnect_calls: usize,
    flush_calls: usize,
    reads: Vec<(u16, u16)>,
    writes: Vec<(u16, Vec<u16>)>,
}

/// Scripted connection over an in-memory register map.
///
/// Clones share state, so a test keeps one handle for assertions while the
/// block owns another.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnection {
    inner: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn connected(memory: Vec<u16>) -> Self {
        let conn = Self::disconnected(memory);
        conn.inner.lock().unwrap().connected = true;
        conn
    }

    pub(crate) fn disconnected(memory: Vec<u16>) -> Self {
        let conn = Self::default();
        conn.inner.lock().unwrap().memory = memory;
        conn
    }

    pub(crate) fn fail_connect(&self, error: Option<ModbusError>) {
        self.inner.lock().unwrap().connect_error = error;
    }

    pub(crate) fn push_read_error(&self, error: ModbusError) {
        self.inner.lock().unwrap().read_errors.push_back(error);
    }

    pub(crate) fn push_write_error(&self, error: ModbusError) {
        self.inner.lock().unwrap().write_errors.push_back(error);
    }

    pub(crate) fn fail_all_writes(&self, error: Option<ModbusError>) {
        self.inner.lock().unwrap().always_fail_writes = error;
    }

    /// Every FC16 takes this long before it lands.
    pub(crate) fn set_write_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().write_delay = delay;
    }

    pub(crate) fn is_up(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    pub(crate) fn drop_link(&self) {
        self.inner.lock().unwrap().connected = false;
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.inner.lock().unwrap().disconnect_calls
    }

    pub(crate) fn flush_calls(&self) -> usize {
        self.inner.lock().unwrap().flush_calls
    }

    pub(crate) fn reads(&self) -> Vec<(u16, u16)> {
        self.inner.lock().unwrap().reads.clone()
    }

    pub(crate) fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub(crate) fn set_register(&self, address: usize, value: u16) {
        self.inner.lock().unwrap().memory[address] = value;
    }
}

impl MasterConnection for MockConnection {
    async fn connect(&mut self) -> ModbusResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.connect_calls += 1;
        if let Some(e) = state.connect_error {
            return Err(e);
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.inner.lock().unwrap();
        state.disconnect_calls += 1;
        state.connected = false;
    }

    fn flush(&mut self) {
        self.inner.lock().unwrap().flush_calls += 1;
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let mut state = self.inner.lock().unwrap();
        state.reads.push((offset, count));
        if let Some(e) = state.read_errors.pop_front() {
            return Err(e);
        }
        let start = offset as usize;
        let end = start + count as usize;
        state
            .memory
            .get(start..end)
            .map(|regs| regs.to_vec())
            .ok_or(ModbusError::IllegalDataAddress)
    }

    async fn write_multiple_registers(&mut self, offset: u16, values: &[u16]) -> ModbusResult<()> {
        let delay = self.inner.lock().unwrap().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.inner.lock().unwrap();
        state.writes.push((offset, values.to_vec()));
        if let Some(e) = state.write_errors.pop_front().or(state.always_fail_writes) {
            return Err(e);
        }
        let start = offset as usize;
        let Some(target) = state.memory.get_mut(start..start + values.len()) else {
            return Err(ModbusError::IllegalDataAddress);
        };
        target.copy_from_slice(values);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    registers: Vec<u16>,
    failure: Option<ModbusError>,
    writes: usize,
    commits: usize,
}

/// Data plane over one device/block pair whose writes land immediately.
#[derive(Debug)]
pub(crate) struct MemoryData {
    device_id: String,
    block_id: String,
    state: Mutex<MemoryState>,
}

impl MemoryData {
    pub(crate) fn new(device_id: &str, block_id: &str, registers: Vec<u16>) -> Self {
        Self {
            device_id: device_id.to_string(),
            block_id: block_id.to_string(),
            state: Mutex::new(MemoryState {
                registers,
                ..MemoryState::default()
            }),
        }
    }

    pub(crate) fn registers(&self) -> Vec<u16> {
        self.state.lock().unwrap().registers.clone()
    }

    pub(crate) fn set_register(&self, register: usize, value: u16) {
        self.state.lock().unwrap().registers[register] = value;
    }

    pub(crate) fn fail_with(&self, failure: Option<ModbusError>) {
        self.state.lock().unwrap().failure = failure;
    }

    pub(crate) fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub(crate) fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    fn locate(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<usize> {
        if device_id != self.device_id {
            return Err(ModbusError::BadDevice);
        }
        if block_id != self.block_id {
            return Err(ModbusError::BadBlock);
        }
        let state = self.state.lock().unwrap();
        if let Some(e) = state.failure {
            return Err(e);
        }
        if register as usize >= state.registers.len() {
            return Err(ModbusError::BadRegister);
        }
        Ok(register as usize)
    }

    fn update(&self, idx: usize, f: impl FnOnce(u16) -> u16) {
        let mut state = self.state.lock().unwrap();
        state.registers[idx] = f(state.registers[idx]);
        state.writes += 1;
    }
}

impl DataInterface for MemoryData {
    fn read_bit(&self, device_id: &str, block_id: &str, register: u16, bit: u8) -> ModbusResult<bool> {
        let idx = self.locate(device_id, block_id, register)?;
        if bit > 15 {
            return Err(ModbusError::BadBitNumber);
        }
        Ok(reg_bit(self.state.lock().unwrap().registers[idx], bit))
    }

    fn write_bit(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        bit: u8,
        value: bool,
    ) -> ModbusResult<()> {
        let idx = self.locate(device_id, block_id, register)?;
        if bit > 15 {
            return Err(ModbusError::BadBitNumber);
        }
        self.update(idx, |reg| with_bit(reg, bit, value));
        Ok(())
    }

    fn read_byte(&self, device_id: &str, block_id: &str, register: u16, index: u8) -> ModbusResult<u8> {
        let idx = self.locate(device_id, block_id, register)?;
        Ok(reg_byte(self.state.lock().unwrap().registers[idx], index))
    }

    fn write_byte(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        index: u8,
        value: u8,
    ) -> ModbusResult<()> {
        let idx = self.locate(device_id, block_id, register)?;
        self.update(idx, |reg| with_byte(reg, index, value));
        Ok(())
    }

    fn read_word(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<u16> {
        let idx = self.locate(device_id, block_id, register)?;
        Ok(self.state.lock().unwrap().registers[idx])
    }

    fn write_word(&self, device_id: &str, block_id: &str, register: u16, value: u16) -> ModbusResult<()> {
        let idx = self.locate(device_id, block_id, register)?;
        self.update(idx, |_| value);
        Ok(())
    }

    fn read_word_pair(&self, device_id: &str, block_id: &str, register: u16) -> ModbusResult<[u16; 2]> {
        let first = self.locate(device_id, block_id, register)?;
        let second = self.locate(device_id, block_id, register.wrapping_add(1))?;
        let state = self.state.lock().unwrap();
        Ok([state.registers[first], state.registers[second]])
    }

    fn write_word_pair(
        &self,
        device_id: &str,
        block_id: &str,
        register: u16,
        values: [u16; 2],
    ) -> ModbusResult<()> {
        let first = self.locate(device_id, block_id, register)?;
        let second = self.locate(device_id, block_id, register.wrapping_add(1))?;
        self.update(first, |_| values[0]);
        self.update(second, |_| values[1]);
        Ok(())
    }

    fn do_write(&self) {
        self.state.lock().unwrap().commits += 1;
    }
}
