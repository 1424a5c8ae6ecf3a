//! Bounded buffering stage between producers and the sink.
//!
//! Producers push through a [`HubPort`]; a ticker thread drains the whole
//! queue every `tick_interval` and hands the batch to the connected
//! [`BatchSink`]. The queue lock is held for a single push or a single drain,
//! never while the sink is being notified.

use crate::lifecycle::{Lifecycle, LifecycleConfig, LifecycleState, StartOutcome, StopOutcome};
use crate::message::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub const N_MESSAGES: usize = 5;
pub const QUEUE_CAPACITY: usize = 3 * N_MESSAGES;
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("Hub queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("No sink connected to the hub")]
    SinkNotConnected,

    #[error("Hub tick interval must be greater than zero")]
    ZeroTick,
}

/// Entry point producers push messages through.
pub trait MessagePort: Send + Sync {
    fn enqueue(&self, message: Message) -> Result<(), HubError>;
}

/// Receiver of drained batches.
pub trait BatchSink: Send + Sync {
    fn notify(&self, batch: Vec<Message>);
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub capacity: usize,
    pub tick_interval: Duration,
    pub lifecycle: LifecycleConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: QUEUE_CAPACITY,
            tick_interval: TICK_INTERVAL,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct HubStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub batches: u64,
    pub drained: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    batches: AtomicU64,
    drained: AtomicU64,
}

struct Shared {
    queue: Mutex<VecDeque<Message>>,
    capacity: usize,
    sink: Mutex<Option<Arc<dyn BatchSink>>>,
    counters: Counters,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self) -> Option<Arc<dyn BatchSink>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enqueue(&self, message: Message) -> Result<(), HubError> {
        let mut queue = self.queue();
        if queue.len() >= self.capacity {
            drop(queue);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(HubError::QueueFull {
                capacity: self.capacity,
            });
        }
        trace!(kind = %message.kind, "Inserting message into the queue");
        queue.push_back(message);
        drop(queue);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn drain(&self) -> Vec<Message> {
        let batch: Vec<Message> = self.queue().drain(..).collect();
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .drained
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    /// Drain and notify the sink. Without a sink the queue is left alone.
    fn flush(&self) -> usize {
        let Some(sink) = self.sink() else {
            return 0;
        };
        let batch = self.drain();
        let len = batch.len();
        if len > 0 {
            debug!(batch_len = len, "Forwarding batch to sink");
        }
        sink.notify(batch);
        len
    }
}

/// Producer-side handle to the hub queue.
#[derive(Clone)]
pub struct HubPort {
    shared: Arc<Shared>,
}

impl MessagePort for HubPort {
    fn enqueue(&self, message: Message) -> Result<(), HubError> {
        self.shared.enqueue(message)
    }
}

/// Sink-side handle for pulling queued messages on demand.
#[derive(Clone)]
pub struct Drain {
    shared: Arc<Shared>,
}

impl Drain {
    /// Take every queued message without notifying the sink.
    pub fn drain(&self) -> Vec<Message> {
        self.shared.drain()
    }

    /// Drain into the connected sink now, outside the ticker schedule.
    pub fn flush(&self) -> usize {
        self.shared.flush()
    }
}

pub struct Hub {
    shared: Arc<Shared>,
    config: HubConfig,
    lifecycle: Lifecycle,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
                capacity: config.capacity,
                sink: Mutex::new(None),
                counters: Counters::default(),
            }),
            config,
            lifecycle: Lifecycle::new("hub-ticker"),
        }
    }

    pub fn connect_producer(&self) -> HubPort {
        HubPort {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register the batch receiver. A later call replaces the earlier sink.
    pub fn connect_sink(&self, sink: Arc<dyn BatchSink>) -> Drain {
        *self
            .shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Drain {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn enqueue(&self, message: Message) -> Result<(), HubError> {
        self.shared.enqueue(message)
    }

    pub fn len(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> HubStats {
        let c = &self.shared.counters;
        HubStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            drained: c.drained.load(Ordering::Relaxed),
        }
    }

    /// Start the ticker. Fails when no sink has been connected or the tick
    /// interval is zero.
    pub fn start(&self) -> Result<StartOutcome, HubError> {
        if self.config.tick_interval.is_zero() {
            warn!("Hub start refused: zero tick interval");
            return Err(HubError::ZeroTick);
        }
        if self.shared.sink().is_none() {
            warn!("Hub start refused: no sink connected");
            return Err(HubError::SinkNotConnected);
        }
        let shared = Arc::clone(&self.shared);
        let tick = self.config.tick_interval;
        info!(
            capacity = self.shared.capacity,
            tick_ms = tick.as_millis() as u64,
            "Starting hub ticker"
        );
        Ok(self
            .lifecycle
            .start(self.config.lifecycle.start_grace, move |cancel, ready| {
                ready.signal();
                while !cancel.wait(tick) {
                    shared.flush();
                }
                let remaining = shared.flush();
                debug!(remaining, "Hub ticker final drain");
            }))
    }

    pub fn stop(&self) -> StopOutcome {
        self.lifecycle
            .stop(self.config.lifecycle.stop_timeout(self.config.tick_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use std::time::Instant;

    #[derive(Default)]
    struct Collect {
        batches: Mutex<Vec<Vec<Message>>>,
    }

    impl BatchSink for Collect {
        fn notify(&self, batch: Vec<Message>) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    fn msg(n: usize) -> Message {
        Message {
            kind: MessageKind::DeviceReadout,
            payload: format!("{{\"n\":{n}}}"),
        }
    }

    fn config(capacity: usize, tick_ms: u64) -> HubConfig {
        HubConfig {
            capacity,
            tick_interval: Duration::from_millis(tick_ms),
            ..HubConfig::default()
        }
    }

    #[test]
    fn enqueue_fails_at_capacity_without_blocking() {
        let hub = Hub::new(HubConfig::default());
        let port = hub.connect_producer();
        for n in 0..QUEUE_CAPACITY {
            assert!(port.enqueue(msg(n)).is_ok());
        }

        let begin = Instant::now();
        assert_eq!(
            port.enqueue(msg(99)),
            Err(HubError::QueueFull {
                capacity: QUEUE_CAPACITY
            })
        );
        assert!(begin.elapsed() < Duration::from_millis(100));
        assert_eq!(hub.len(), QUEUE_CAPACITY);
        assert_eq!(hub.stats().rejected, 1);
    }

    #[test]
    fn drain_frees_capacity_in_fifo_order() {
        let hub = Hub::new(config(3, 500));
        let drain = hub.connect_sink(Arc::new(Collect::default()));
        for n in 0..3 {
            hub.enqueue(msg(n)).unwrap();
        }
        assert!(hub.enqueue(msg(3)).is_err());

        let batch = drain.drain();
        assert_eq!(batch, vec![msg(0), msg(1), msg(2)]);
        assert!(hub.is_empty());
        assert!(hub.enqueue(msg(4)).is_ok());
    }

    #[test]
    fn start_requires_sink() {
        let hub = Hub::new(HubConfig::default());
        assert_eq!(hub.start(), Err(HubError::SinkNotConnected));
        assert_eq!(hub.state(), LifecycleState::Idle);
    }

    #[test]
    fn start_rejects_zero_tick() {
        let hub = Hub::new(config(15, 0));
        hub.connect_sink(Arc::new(Collect::default()));
        assert_eq!(hub.start(), Err(HubError::ZeroTick));
        assert_eq!(hub.state(), LifecycleState::Idle);
    }

    #[test]
    fn ticker_forwards_batches_and_empty_ticks() {
        let hub = Hub::new(config(15, 50));
        let sink = Arc::new(Collect::default());
        hub.connect_sink(sink.clone());
        hub.enqueue(msg(1)).unwrap();
        hub.enqueue(msg(2)).unwrap();

        assert_eq!(hub.start(), Ok(StartOutcome::Started));
        assert_eq!(hub.start(), Ok(StartOutcome::AlreadyRunning));
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(hub.stop(), StopOutcome::Stopped);

        let batches = sink.batches.lock().unwrap();
        let delivered: Vec<Message> = batches.iter().flatten().cloned().collect();
        assert_eq!(delivered, vec![msg(1), msg(2)]);
        assert!(batches.iter().any(Vec::is_empty), "empty ticks still notify");
    }

    #[test]
    fn stop_flushes_remaining_messages() {
        let hub = Hub::new(config(15, 10_000));
        let sink = Arc::new(Collect::default());
        hub.connect_sink(sink.clone());
        hub.start().unwrap();
        hub.enqueue(msg(7)).unwrap();

        assert_eq!(hub.stop(), StopOutcome::Stopped);
        let delivered: Vec<Message> = sink
            .batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect();
        assert_eq!(delivered, vec![msg(7)]);
        assert!(hub.is_empty());
    }
}
