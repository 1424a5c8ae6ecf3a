//! Persistence consumer at the end of the pipeline.
//!
//! The hub delivers batches through a [`SinkInbox`], which appends them to a
//! buffer and raises a single-slot "batch ready" signal. The sink worker wakes
//! on that signal, persists the buffer while holding its lock and clears it
//! afterwards whatever the outcome. A failing backend never stops the loop.

use crate::hub::{BatchSink, QUEUE_CAPACITY, TICK_INTERVAL};
use crate::lifecycle::{Lifecycle, LifecycleConfig, LifecycleState, StartOutcome, StopOutcome};
use crate::message::Message;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hub queues' worth of messages the sink holds before it starts
/// discarding the oldest ones.
pub const BUFFER_BATCHES: usize = 4;
pub const BUFFER_CAPACITY: usize = BUFFER_BATCHES * QUEUE_CAPACITY;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Batch of {len} messages rolled back: {reason}")]
    RolledBack { len: usize, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage backend.
pub trait Persist: Send {
    fn name(&self) -> &str;

    /// Store the whole batch. Implementations decide whether a failure leaves
    /// a partial batch behind.
    fn persist(&mut self, batch: &[Message]) -> Result<(), PersistError>;
}

#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Expected gap between deliveries; stop waits a multiple of it
    pub wake_interval: Duration,
    /// Upper bound on buffered, not yet persisted messages
    pub buffer_capacity: usize,
    pub lifecycle: LifecycleConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            wake_interval: TICK_INTERVAL,
            buffer_capacity: BUFFER_CAPACITY,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct SinkStats {
    pub batches_persisted: u64,
    pub batches_failed: u64,
    pub messages_persisted: u64,
    pub messages_dropped: u64,
}

#[derive(Default)]
struct Counters {
    batches_persisted: AtomicU64,
    batches_failed: AtomicU64,
    messages_persisted: AtomicU64,
    messages_dropped: AtomicU64,
}

struct Shared {
    buffer: Mutex<Vec<Message>>,
    capacity: usize,
    store: Mutex<Box<dyn Persist>>,
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
    counters: Counters,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, Vec<Message>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receive(&self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        let mut buffer = self.buffer();
        buffer.extend(batch);
        let overflow = buffer.len().saturating_sub(self.capacity);
        if overflow > 0 {
            buffer.drain(..overflow);
        }
        drop(buffer);
        if overflow > 0 {
            self.counters
                .messages_dropped
                .fetch_add(overflow as u64, Ordering::Relaxed);
            warn!(
                dropped = overflow,
                capacity = self.capacity,
                "Sink buffer full; oldest messages discarded"
            );
        }
        // A full slot means the worker has not picked up the last signal yet.
        let _ = self.ready_tx.try_send(());
    }

    fn persist_pending(&self) {
        let mut buffer = self.buffer();
        if buffer.is_empty() {
            return;
        }
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let len = buffer.len() as u64;
        match store.persist(&buffer) {
            Ok(()) => {
                self.counters
                    .batches_persisted
                    .fetch_add(1, Ordering::Relaxed);
                self.counters
                    .messages_persisted
                    .fetch_add(len, Ordering::Relaxed);
                debug!(store = store.name(), batch_len = len, "Stored messages into repository");
            }
            Err(e) => {
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .messages_dropped
                    .fetch_add(len, Ordering::Relaxed);
                warn!(store = store.name(), batch_len = len, error = %e, "Failed to persist batch");
            }
        }
        buffer.clear();
    }
}

/// Hub-facing handle of a [`Sink`].
#[derive(Clone)]
pub struct SinkInbox {
    shared: Arc<Shared>,
}

impl BatchSink for SinkInbox {
    fn notify(&self, batch: Vec<Message>) {
        self.shared.receive(batch);
    }
}

pub struct Sink {
    shared: Arc<Shared>,
    config: SinkConfig,
    lifecycle: Lifecycle,
}

impl Sink {
    pub fn new(store: Box<dyn Persist>, config: SinkConfig) -> Self {
        let (ready_tx, ready_rx) = bounded(1);
        let name = format!("sink-{}", store.name());
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Vec::new()),
                capacity: config.buffer_capacity.max(1),
                store: Mutex::new(store),
                ready_tx,
                ready_rx,
                counters: Counters::default(),
            }),
            config,
            lifecycle: Lifecycle::new(name),
        }
    }

    pub fn inbox(&self) -> SinkInbox {
        SinkInbox {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Messages received but not yet persisted.
    pub fn pending(&self) -> usize {
        self.shared.buffer().len()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> SinkStats {
        let c = &self.shared.counters;
        SinkStats {
            batches_persisted: c.batches_persisted.load(Ordering::Relaxed),
            batches_failed: c.batches_failed.load(Ordering::Relaxed),
            messages_persisted: c.messages_persisted.load(Ordering::Relaxed),
            messages_dropped: c.messages_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn start(&self) -> StartOutcome {
        let shared = Arc::clone(&self.shared);
        info!(task = %self.lifecycle.name(), "Starting sink");
        self.lifecycle
            .start(self.config.lifecycle.start_grace, move |cancel, ready| {
                let ready_rx = shared.ready_rx.clone();
                ready.signal();
                loop {
                    select! {
                        recv(cancel.receiver()) -> _ => break,
                        recv(ready_rx) -> signal => {
                            if signal.is_err() {
                                break;
                            }
                            shared.persist_pending();
                        }
                    }
                }
                shared.persist_pending();
            })
    }

    /// Stop the worker after it persists whatever is still buffered.
    pub fn stop(&self) -> StopOutcome {
        self.lifecycle
            .stop(self.config.lifecycle.stop_timeout(self.config.wake_interval))
    }
}
