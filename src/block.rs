//! Block: a contiguous holding-register range polled and written as a unit
//!
//! # State and Locking
//!
//! Each block keeps the last good read (`snapshot`), the queue of pending
//! sub-register writes, its write flags, its `master` role and its health,
//! all behind the block's own lock. The device session sits behind a
//! separate async lock shared by every block of the device.
//!
//! The block lock is never held across an `.await`. A cycle takes the
//! session lock first and only touches the block lock briefly while holding
//! it, so a slow connect stalls the blocks of one device but never a
//! caller reading a block's fields.
//!
//! # Master Role
//!
//! When the session is down only the block holding the master role
//! reconnects; every other block fails its cycle with `host_not_reachable`
//! without touching the network. A successful connect clears the flag, and
//! whichever block next hits a fault that requires a reconnect takes the
//! role back.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::bytes::{reg_bit, reg_byte, with_bit, with_byte};
use crate::config::BlockConfig;
use crate::connection::MasterConnection;
use crate::error::{ModbusError, ModbusResult};

/// Session shared by the blocks of one device.
pub type SharedConnection<C> = Arc<AsyncMutex<C>>;

/// One queued sub-register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteItem {
    Bit { register: u16, bit: u8, value: bool },
    Byte { register: u16, index: u8, value: u8 },
    Word { register: u16, value: u16 },
}

impl WriteItem {
    pub fn register(&self) -> u16 {
        match *self {
            WriteItem::Bit { register, .. }
            | WriteItem::Byte { register, .. }
            | WriteItem::Word { register, .. } => register,
        }
    }
}

/// Apply `items` in order onto a copy of `base`.
///
/// Items addressing a register outside `base` are skipped; accessors
/// validate before queueing, so this only matters for direct callers.
pub fn merge(base: &[u16], items: &[WriteItem]) -> Vec<u16> {
    let mut merged = base.to_vec();
    for item in items {
        let Some(reg) = merged.get_mut(item.register() as usize) else {
            continue;
        };
        *reg = match *item {
            WriteItem::Bit { bit, value, .. } => with_bit(*reg, bit, value),
            WriteItem::Byte { index, value, .. } => with_byte(*reg, index, value),
            WriteItem::Word { value, .. } => value,
        };
    }
    merged
}

/// Whether a block's data can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockHealth {
    /// No cycle has succeeded yet
    #[default]
    Initializing,
    /// Last cycle succeeded
    Healthy,
    /// Last cycle failed with this kind
    Faulted(ModbusError),
}

impl BlockHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, BlockHealth::Healthy)
    }

    /// Block error string
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockHealth::Initializing => "error_init",
            BlockHealth::Healthy => "no_error",
            BlockHealth::Faulted(e) => e.as_str(),
        }
    }
}

impl fmt::Display for BlockHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BlockHealth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug)]
struct BlockState {
    snapshot: Vec<u16>,
    queue: Vec<WriteItem>,
    /// Queue is non-empty
    write_requested: bool,
    /// `do_write` was called and not yet served
    commit_requested: bool,
    master: bool,
    health: BlockHealth,
}

/// A register range of one device.
#[derive(Debug)]
pub struct Block<C: MasterConnection> {
    config: BlockConfig,
    connection: SharedConnection<C>,
    state: Mutex<BlockState>,
}

impl<C: MasterConnection> Block<C> {
    pub fn new(config: BlockConfig, connection: SharedConnection<C>, master: bool) -> Self {
        let state = BlockState {
            snapshot: vec![0; config.count as usize],
            queue: Vec::new(),
            write_requested: false,
            commit_requested: false,
            master,
            health: BlockHealth::Initializing,
        };
        Self {
            config,
            connection,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn offset(&self) -> u16 {
        self.config.offset
    }

    pub fn count(&self) -> u16 {
        self.config.count
    }

    pub fn cycle_time(&self) -> Duration {
        self.config.cycle_time()
    }

    pub fn retries(&self) -> u32 {
        self.config.retries
    }

    pub fn error_sleep(&self) -> Duration {
        self.config.error_sleep()
    }

    pub fn health(&self) -> BlockHealth {
        self.state().health
    }

    pub fn is_master(&self) -> bool {
        self.state().master
    }

    pub fn set_master(&self) {
        self.state().master = true;
    }

    /// Queued items not yet sent.
    pub fn pending_writes(&self) -> usize {
        self.state().queue.len()
    }

    pub fn write_requested(&self) -> bool {
        self.state().write_requested
    }

    /// Copy of the last successful read.
    pub fn snapshot(&self) -> Vec<u16> {
        self.state().snapshot.clone()
    }

    // ------------------------------------------------------------------
    // Field accessors
    // ------------------------------------------------------------------

    fn check_register(&self, register: u16) -> ModbusResult<usize> {
        if register >= self.config.count {
            return Err(ModbusError::BadRegister);
        }
        Ok(register as usize)
    }

    fn check_pair(&self, register: u16) -> ModbusResult<(usize, usize)> {
        let first = self.check_register(register)?;
        let next = register.checked_add(1).ok_or(ModbusError::BadRegister)?;
        Ok((first, self.check_register(next)?))
    }

    fn check_bit(bit: u8) -> ModbusResult<()> {
        if bit > 15 {
            return Err(ModbusError::BadBitNumber);
        }
        Ok(())
    }

    /// Locked state, provided the data is trustworthy.
    fn healthy_state(&self) -> ModbusResult<MutexGuard<'_, BlockState>> {
        let state = self.state();
        if !state.health.is_healthy() {
            return Err(ModbusError::BlockError);
        }
        Ok(state)
    }

    fn enqueue(&self, item: WriteItem) -> ModbusResult<()> {
        let mut state = self.healthy_state()?;
        state.queue.push(item);
        state.write_requested = true;
        Ok(())
    }

    pub fn read_bit(&self, register: u16, bit: u8) -> ModbusResult<bool> {
        let idx = self.check_register(register)?;
        Self::check_bit(bit)?;
        let state = self.healthy_state()?;
        Ok(reg_bit(state.snapshot[idx], bit))
    }

    pub fn write_bit(&self, register: u16, bit: u8, value: bool) -> ModbusResult<()> {
        self.check_register(register)?;
        Self::check_bit(bit)?;
        self.enqueue(WriteItem::Bit { register, bit, value })
    }

    /// `index` 0 is the low byte, anything else the high byte.
    pub fn read_byte(&self, register: u16, index: u8) -> ModbusResult<u8> {
        let idx = self.check_register(register)?;
        let state = self.healthy_state()?;
        Ok(reg_byte(state.snapshot[idx], index))
    }

    pub fn write_byte(&self, register: u16, index: u8, value: u8) -> ModbusResult<()> {
        self.check_register(register)?;
        self.enqueue(WriteItem::Byte { register, index, value })
    }

    pub fn read_word(&self, register: u16) -> ModbusResult<u16> {
        let idx = self.check_register(register)?;
        let state = self.healthy_state()?;
        Ok(state.snapshot[idx])
    }

    pub fn write_word(&self, register: u16, value: u16) -> ModbusResult<()> {
        self.check_register(register)?;
        self.enqueue(WriteItem::Word { register, value })
    }

    /// Two consecutive registers from one snapshot.
    pub fn read_word_pair(&self, register: u16) -> ModbusResult<[u16; 2]> {
        let (first, second) = self.check_pair(register)?;
        let state = self.healthy_state()?;
        Ok([state.snapshot[first], state.snapshot[second]])
    }

    /// Queue both words or neither.
    pub fn write_word_pair(&self, register: u16, values: [u16; 2]) -> ModbusResult<()> {
        self.check_pair(register)?;
        let mut state = self.healthy_state()?;
        state.queue.push(WriteItem::Word { register, value: values[0] });
        state.queue.push(WriteItem::Word { register: register + 1, value: values[1] });
        state.write_requested = true;
        Ok(())
    }

    /// Ask the worker to send queued writes on its next tick.
    pub fn request_write(&self) {
        self.state().commit_requested = true;
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    pub(crate) fn commit_requested(&self) -> bool {
        self.state().commit_requested
    }

    /// Drop every queued item after the retry budget ran out.
    pub(crate) fn abandon_writes(&self) -> usize {
        let mut state = self.state();
        let dropped = state.queue.len();
        state.queue.clear();
        state.write_requested = false;
        state.commit_requested = false;
        dropped
    }

    fn set_health(&self, health: BlockHealth) {
        let previous = std::mem::replace(&mut self.state().health, health);
        if previous != health {
            match health {
                BlockHealth::Healthy => {
                    info!("Block {} recovered (was {})", self.config.id, previous)
                }
                BlockHealth::Faulted(e) => {
                    warn!("Block {} failed: {}", self.config.id, e.as_str())
                }
                BlockHealth::Initializing => {}
            }
        }
    }

    /// Make sure the shared session is up, reconnecting only as master.
    async fn ensure_connected(&self, conn: &mut C) -> ModbusResult<()> {
        if conn.is_connected() {
            return Ok(());
        }

        let master = self.state().master;
        if !master {
            return Err(ModbusError::HostNotReachable);
        }

        debug!("Block {} reconnecting as master", self.config.id);
        match conn.connect().await {
            Ok(()) => {
                self.state().master = false;
                info!("Block {} re-established the device session", self.config.id);
                Ok(())
            }
            Err(e) => {
                if self.health() != BlockHealth::Faulted(e) {
                    error!("Block {} could not connect: {}", self.config.id, e.as_str());
                }
                Err(e)
            }
        }
    }

    /// Record a failed request, dropping the session if it cannot be trusted.
    async fn handle_fault(&self, conn: &mut C, e: ModbusError) {
        self.set_health(BlockHealth::Faulted(e));
        if e.requires_reconnect() {
            conn.disconnect().await;
            self.state().master = true;
            debug!("Block {} dropped the session and took the master role", self.config.id);
        } else {
            conn.flush();
        }
    }

    /// One read of the whole range. Returns whether it succeeded.
    pub(crate) async fn read_cycle(&self) -> bool {
        let mut conn = self.connection.lock().await;
        if let Err(e) = self.ensure_connected(&mut conn).await {
            self.set_health(BlockHealth::Faulted(e));
            return false;
        }

        let result = conn
            .read_holding_registers(self.config.offset, self.config.count)
            .await;
        match result {
            Ok(registers) if registers.len() == self.config.count as usize => {
                drop(conn);
                self.state().snapshot = registers;
                self.set_health(BlockHealth::Healthy);
                true
            }
            Ok(registers) => {
                warn!(
                    "Block {} got {} registers, expected {}",
                    self.config.id,
                    registers.len(),
                    self.config.count
                );
                self.handle_fault(&mut conn, ModbusError::UndefinedException).await;
                false
            }
            Err(e) => {
                self.handle_fault(&mut conn, e).await;
                false
            }
        }
    }

    /// Merge queued items onto the snapshot and send the whole range.
    ///
    /// Succeeds without sending when nothing is queued. Items queued while
    /// the request is in flight stay for the next write.
    pub(crate) async fn write_cycle(&self) -> bool {
        let mut conn = self.connection.lock().await;
        if let Err(e) = self.ensure_connected(&mut conn).await {
            self.set_health(BlockHealth::Faulted(e));
            return false;
        }

        // Served from here on; a request arriving while FC16 is in flight
        // sets the flag again for the next tick.
        let (merged, merged_items) = {
            let mut state = self.state();
            state.commit_requested = false;
            if !state.write_requested {
                return true;
            }
            (merge(&state.snapshot, &state.queue), state.queue.len())
        };

        let result = conn
            .write_multiple_registers(self.config.offset, &merged)
            .await;
        match result {
            Ok(()) => {
                drop(conn);
                {
                    let mut state = self.state();
                    state.snapshot = merged;
                    state.queue.drain(..merged_items);
                    state.write_requested = !state.queue.is_empty();
                }
                self.set_health(BlockHealth::Healthy);
                debug!("Block {} wrote {} queued items", self.config.id, merged_items);
                true
            }
            Err(e) => {
                self.state().commit_requested = true;
                self.handle_fault(&mut conn, e).await;
                false
            }
        }
    }
}
