//! Per-device periodic producer.
//!
//! A producer owns one [`SignalGenerator`] and a worker thread that, once
//! started, wakes every `interval`, samples the signal and pushes the reading
//! through its [`MessagePort`]. A push the hub rejects is logged and the
//! reading dropped; the loop keeps going.

use crate::hub::MessagePort;
use crate::lifecycle::{Lifecycle, LifecycleConfig, LifecycleState, StartOutcome, StopOutcome};
use crate::message::{DeviceStatus, Message, MessageKind, Reading};
use crate::signal::SignalGenerator;
use crate::timebase::posix_timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const BASE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct ProducerStats {
    pub emitted: u64,
    pub dropped: u64,
}

struct Device {
    name: String,
    interval: Duration,
    signal: Mutex<SignalGenerator>,
    port: Arc<dyn MessagePort>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl Device {
    fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    /// Sample, build and push one readout while holding the device lock.
    fn emit_readout(&self) {
        let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        let sample = signal.next_sample();
        let reading = Reading {
            device_name: self.name.clone(),
            value: signal.format(sample.value),
            interval_ms: self.interval_ms(),
            posix_timestamp: posix_timestamp(),
        };
        let message = if sample.reflected {
            Message::out_of_range(&reading)
        } else {
            Message::readout(&reading)
        };
        match message {
            Ok(message) => {
                debug!(
                    device = %self.name,
                    value = %reading.value,
                    kind = %message.kind,
                    "Readout"
                );
                self.push(message);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device = %self.name, error = %e, "Failed to encode readout");
            }
        }
    }

    fn announce(&self, kind: MessageKind) {
        let status = DeviceStatus {
            device_name: self.name.clone(),
            interval_ms: self.interval_ms(),
            posix_timestamp: posix_timestamp(),
        };
        match Message::status(kind, &status) {
            Ok(message) => self.push(message),
            Err(e) => warn!(device = %self.name, error = %e, "Failed to encode status"),
        }
    }

    fn push(&self, message: Message) {
        match self.port.enqueue(message) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device = %self.name, error = %e, "Dropping message");
            }
        }
    }
}

pub struct Producer {
    device: Arc<Device>,
    lifecycle: Lifecycle,
    config: LifecycleConfig,
}

impl Producer {
    /// Producer whose signal is seeded from `name`.
    pub fn new(name: impl Into<String>, interval: Duration, port: Arc<dyn MessagePort>) -> Self {
        let name = name.into();
        let signal = SignalGenerator::new(&name);
        Self::with_signal(name, interval, signal, port)
    }

    pub fn with_signal(
        name: impl Into<String>,
        interval: Duration,
        signal: SignalGenerator,
        port: Arc<dyn MessagePort>,
    ) -> Self {
        let name = name.into();
        Self {
            lifecycle: Lifecycle::new(name.clone()),
            device: Arc::new(Device {
                name,
                interval,
                signal: Mutex::new(signal),
                port,
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            config: LifecycleConfig::default(),
        }
    }

    pub fn with_lifecycle(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn interval(&self) -> Duration {
        self.device.interval
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            emitted: self.device.emitted.load(Ordering::Relaxed),
            dropped: self.device.dropped.load(Ordering::Relaxed),
        }
    }

    /// Emit one readout immediately, outside the periodic schedule.
    pub fn send_readout(&self) {
        self.device.emit_readout();
    }

    /// Spawn the worker. A zero interval is refused; the loop would spin.
    pub fn start(&self) -> StartOutcome {
        if self.device.interval.is_zero() {
            warn!(device = %self.name(), "Refusing to start with a zero interval");
            return StartOutcome::InvalidInterval;
        }
        let device = Arc::clone(&self.device);
        let outcome = self
            .lifecycle
            .start(self.config.start_grace, move |cancel, ready| {
                device.announce(MessageKind::DeviceOnline);
                ready.signal();
                while !cancel.wait(device.interval) {
                    device.emit_readout();
                }
                device.announce(MessageKind::DeviceOffline);
            });
        if outcome == StartOutcome::Started {
            info!(
                device = %self.name(),
                interval_ms = self.device.interval_ms(),
                "Producer started"
            );
        }
        outcome
    }

    /// Cooperative stop, waiting at most `stop_timeout_factor × interval`.
    pub fn stop(&self) -> StopOutcome {
        self.lifecycle
            .stop(self.config.stop_timeout(self.device.interval))
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.device.name)
            .field("interval", &self.device.interval)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubError;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<Message>>,
    }

    impl MessagePort for Recorder {
        fn enqueue(&self, message: Message) -> Result<(), HubError> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct Full;

    impl MessagePort for Full {
        fn enqueue(&self, _message: Message) -> Result<(), HubError> {
            Err(HubError::QueueFull { capacity: 0 })
        }
    }

    fn readings(recorder: &Recorder) -> Vec<Reading> {
        recorder
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(Message::reading)
            .collect()
    }

    #[test]
    fn emits_online_readouts_offline() {
        let port = Arc::new(Recorder::default());
        let producer = Producer::new("Thermal Sensor 01", Duration::from_millis(40), port.clone());

        assert_eq!(producer.start(), StartOutcome::Started);
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(producer.stop(), StopOutcome::Stopped);

        let messages = port.messages.lock().unwrap().clone();
        assert_eq!(messages.first().map(|m| m.kind), Some(MessageKind::DeviceOnline));
        assert_eq!(messages.last().map(|m| m.kind), Some(MessageKind::DeviceOffline));

        let readings = readings(&port);
        assert!(readings.len() >= 3, "got {} readings", readings.len());
        for reading in &readings {
            assert_eq!(reading.device_name, "Thermal Sensor 01");
            assert_eq!(reading.interval_ms, 40);
        }
        let stamps: Vec<u64> = readings.iter().filter_map(Reading::unix_us).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn start_is_idempotent() {
        let port = Arc::new(Recorder::default());
        let producer = Producer::new("Humidity Sensor 04", Duration::from_secs(60), port.clone());

        assert_eq!(producer.start(), StartOutcome::Started);
        assert_eq!(producer.start(), StartOutcome::AlreadyRunning);
        assert_eq!(producer.state(), LifecycleState::Running);
        assert_eq!(producer.stop(), StopOutcome::Stopped);

        let online = port
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == MessageKind::DeviceOnline)
            .count();
        assert_eq!(online, 1, "only one worker was spawned");
    }

    #[test]
    fn stop_when_not_running_is_noop() {
        let producer = Producer::new("Magnetic Sensor 02", Duration::from_secs(1), Arc::new(Full));
        assert_eq!(producer.stop(), StopOutcome::NotRunning);
        assert_eq!(producer.state(), LifecycleState::Idle);
    }

    #[test]
    fn stop_does_not_wait_out_the_interval() {
        let producer = Producer::new(
            "Vibration Sensor 01",
            Duration::from_secs(30),
            Arc::new(Recorder::default()),
        );
        producer.start();
        let begin = Instant::now();
        assert_eq!(producer.stop(), StopOutcome::Stopped);
        assert!(begin.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn full_port_drops_without_crashing() {
        let producer =
            Producer::new("Pressure Sensor 03", Duration::from_millis(25), Arc::new(Full));
        producer.start();
        std::thread::sleep(Duration::from_millis(150));
        assert!(producer.is_running());
        assert_eq!(producer.stop(), StopOutcome::Stopped);

        let stats = producer.stats();
        assert_eq!(stats.emitted, 0);
        assert!(stats.dropped >= 3);
    }

    #[test]
    fn zero_interval_is_refused() {
        let port = Arc::new(Recorder::default());
        let producer = Producer::new("Flow Sensor 00", Duration::ZERO, port.clone());

        assert_eq!(producer.start(), StartOutcome::InvalidInterval);
        assert_eq!(producer.state(), LifecycleState::Idle);
        assert_eq!(producer.stop(), StopOutcome::NotRunning);
        assert!(port.messages.lock().unwrap().is_empty());
        assert_eq!(producer.stats(), ProducerStats::default());
    }

    #[test]
    fn same_name_same_values() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let pa = Producer::new("Thermal Sensor 05", Duration::from_secs(1), a.clone());
        let pb = Producer::new("Thermal Sensor 05", Duration::from_secs(1), b.clone());
        for _ in 0..10 {
            pa.send_readout();
            pb.send_readout();
        }
        let va: Vec<String> = readings(&a).into_iter().map(|r| r.value).collect();
        let vb: Vec<String> = readings(&b).into_iter().map(|r| r.value).collect();
        assert_eq!(va.len(), 10);
        assert_eq!(va, vb);
    }
}
