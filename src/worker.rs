//! Per-block polling loop
//!
//! Every block gets one task that wakes each [`TICK`]. A tick first sends
//! pending writes when a commit was requested, then reads the block when a
//! read is due. A successful write always schedules an immediate re-read so
//! the snapshot reflects what the device accepted.
//!
//! A failed write is retried on the following ticks, pausing `error_sleep`
//! after each attempt, until it has failed `retries + 1` times in a row; the
//! queue is then dropped. Failed reads pause the same way and are retried
//! without limit.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::connection::MasterConnection;
use crate::constants::TICK;

/// Loop state for one block.
#[derive(Debug)]
pub struct BlockWorker<C: MasterConnection> {
    block: Arc<Block<C>>,
    read_pending: bool,
    read_ok: bool,
    elapsed: Duration,
    write_failures: u32,
}

impl<C: MasterConnection> BlockWorker<C> {
    /// The first tick always reads.
    pub fn new(block: Arc<Block<C>>) -> Self {
        Self {
            block,
            read_pending: true,
            read_ok: false,
            elapsed: Duration::ZERO,
            write_failures: 0,
        }
    }

    pub fn block(&self) -> &Arc<Block<C>> {
        &self.block
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Block {} worker started", self.block.id());
        while !cancel.is_cancelled() {
            self.tick(&cancel).await;
            tokio::select! {
                _ = sleep(TICK) => {}
                () = cancel.cancelled() => break,
            }
        }
        info!("Block {} worker stopped", self.block.id());
    }

    /// One pass of the loop body.
    pub async fn tick(&mut self, cancel: &CancellationToken) {
        if self.block.commit_requested() {
            if self.block.write_cycle().await {
                self.write_failures = 0;
                self.read_pending = true;
            } else {
                self.write_failures += 1;
                if self.write_failures > self.block.retries() {
                    let dropped = self.block.abandon_writes();
                    warn!(
                        "Block {} dropped {} queued writes after {} failed attempts",
                        self.block.id(),
                        dropped,
                        self.write_failures
                    );
                    self.write_failures = 0;
                } else {
                    debug!(
                        "Block {} write attempt {} failed",
                        self.block.id(),
                        self.write_failures
                    );
                    self.pause(cancel, self.block.error_sleep()).await;
                }
            }
        }

        if self.read_pending {
            self.read_ok = self.block.read_cycle().await;
            self.elapsed = Duration::ZERO;
            if self.read_ok {
                self.read_pending = false;
            } else {
                self.pause(cancel, self.block.error_sleep()).await;
            }
        }

        let cycle_time = self.block.cycle_time();
        if self.read_ok && !cycle_time.is_zero() && self.elapsed >= cycle_time {
            self.read_pending = true;
        } else {
            self.elapsed += TICK;
        }
    }

    async fn pause(&self, cancel: &CancellationToken, duration: Duration) {
        tokio::select! {
            _ = sleep(duration) => {}
            () = cancel.cancelled() => {}
        }
    }
}
