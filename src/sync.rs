//! Tag synchronizer
//!
//! Keeps the configured tags in step with the driver. Each cycle decodes
//! every tag, reports the ones whose value or validity changed, then applies
//! queued write requests and commits them with a single `do_write`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TagConfig;
use crate::constants::{HEARTBEAT_CYCLES, SYNC_CYCLE};
use crate::interface::DataInterface;
use crate::tag::{Tag, Validity};

/// Pending write requests buffered before the synchronizer drains them
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// A tag whose value or validity changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagUpdate {
    pub id: u32,
    pub name: String,
    pub value: String,
    pub validity: Validity,
    pub timestamp: DateTime<Utc>,
}

/// Request to write `value` through tag `tag_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub tag_id: u32,
    pub value: String,
}

impl WriteRequest {
    pub fn new(tag_id: u32, value: impl Into<String>) -> Self {
        Self {
            tag_id,
            value: value.into(),
        }
    }
}

/// Receiver of tag changes.
pub trait TagSink: Send {
    fn tag_changed(&mut self, update: &TagUpdate);

    /// Called every [`HEARTBEAT_CYCLES`] cycles.
    fn heartbeat(&mut self, at: DateTime<Utc>) {
        let _ = at;
    }
}

/// Sink that logs every change.
#[derive(Debug, Default)]
pub struct LogSink;

impl TagSink for LogSink {
    fn tag_changed(&mut self, update: &TagUpdate) {
        info!(
            "Tag {} ({}) = {} [{}]",
            update.id, update.name, update.value, update.validity
        );
    }

    fn heartbeat(&mut self, at: DateTime<Utc>) {
        debug!("Tag synchronizer alive at {}", at.to_rfc3339());
    }
}

pub struct TagSynchronizer<D: DataInterface + ?Sized, S: TagSink> {
    data: Arc<D>,
    sink: S,
    tags: BTreeMap<u32, Tag>,
    reported: HashMap<u32, (String, Validity)>,
    requests: mpsc::Receiver<WriteRequest>,
    cycles: u32,
}

impl<D: DataInterface + ?Sized + 'static, S: TagSink + 'static> TagSynchronizer<D, S> {
    /// Build the tag set and the channel feeding write requests to it.
    pub fn new(data: Arc<D>, tags: &[TagConfig], sink: S) -> (Self, mpsc::Sender<WriteRequest>) {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let tags = tags.iter().map(|config| (config.id, Tag::new(config))).collect();
        let sync = Self {
            data,
            sink,
            tags,
            reported: HashMap::new(),
            requests: rx,
            cycles: 0,
        };
        (sync, tx)
    }

    pub fn tag(&self, id: u32) -> Option<&Tag> {
        self.tags.get(&id)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Refresh, report and write once. Returns the number of changed tags.
    pub fn cycle(&mut self) -> usize {
        let changed = self.refresh();
        let applied = self.apply_writes();
        if applied > 0 {
            self.data.do_write();
            debug!("Committed {} tag writes", applied);
        }

        self.cycles += 1;
        if self.cycles >= HEARTBEAT_CYCLES {
            self.cycles = 0;
            self.sink.heartbeat(Utc::now());
        }
        changed
    }

    fn refresh(&mut self) -> usize {
        let mut changed = 0;
        for tag in self.tags.values_mut() {
            tag.decode(self.data.as_ref());
            let current = (tag.value().to_string(), tag.validity());
            if self.reported.get(&tag.id()) == Some(&current) {
                continue;
            }

            self.sink.tag_changed(&TagUpdate {
                id: tag.id(),
                name: tag.name().to_string(),
                value: current.0.clone(),
                validity: current.1,
                timestamp: Utc::now(),
            });
            self.reported.insert(tag.id(), current);
            changed += 1;
        }
        changed
    }

    fn apply_writes(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(request) = self.requests.try_recv() {
            let Some(tag) = self.tags.get_mut(&request.tag_id) else {
                warn!("Write to unknown tag {} ignored", request.tag_id);
                continue;
            };
            tag.set_value(request.value);
            if tag.encode(self.data.as_ref()) {
                applied += 1;
            }
        }
        applied
    }

    /// Cycle every [`SYNC_CYCLE`] until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Tag synchronizer started with {} tags", self.tags.len());
        let mut ticker = interval(SYNC_CYCLE);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle();
                }
                () = cancel.cancelled() => break,
            }
        }
        info!("Tag synchronizer stopped");
    }
}
