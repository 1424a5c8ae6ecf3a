//! One-place assembly of hub, sink and producers.
//!
//! The builder materialises the whole dependency graph: every producer gets
//! a port into the hub, the hub gets the sink inbox, the sink owns the store.
//! [`Pipeline::start`] brings up the sink and hub before any producer, and
//! [`Pipeline::shutdown`] tears them down in the reverse order.

use crate::hub::{Drain, Hub, HubConfig, HubError, MessagePort};
use crate::lifecycle::{LifecycleConfig, StartOutcome, StopOutcome};
use crate::producer::Producer;
use crate::registry::{DeviceRegistry, N_MAX_SENSORS};
use crate::signal::{SignalConfig, SignalError, SignalGenerator};
use crate::sink::{Persist, Sink, SinkConfig, BUFFER_BATCHES};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("Device {name} has a zero sampling interval")]
    ZeroInterval { name: String },

    #[error("Hub tick interval must be greater than zero")]
    ZeroTick,

    #[error("Failed to spawn the {component} thread")]
    SpawnFailed { component: &'static str },
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub hub: HubConfig,
    pub registry_capacity: usize,
    pub lifecycle: LifecycleConfig,
    pub signal: SignalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            registry_capacity: N_MAX_SENSORS,
            lifecycle: LifecycleConfig::default(),
            signal: SignalConfig::default(),
        }
    }
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Box<dyn Persist>,
    devices: Vec<(String, Duration)>,
}

impl PipelineBuilder {
    pub fn new(store: Box<dyn Persist>) -> Self {
        Self {
            config: PipelineConfig::default(),
            store,
            devices: Vec::new(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn device(mut self, name: impl Into<String>, interval: Duration) -> Self {
        self.devices.push((name.into(), interval));
        self
    }

    pub fn devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = (S, Duration)>,
        S: Into<String>,
    {
        self.devices
            .extend(devices.into_iter().map(|(name, interval)| (name.into(), interval)));
        self
    }

    /// Validate the configuration and wire every component together.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let PipelineConfig {
            hub: mut hub_config,
            registry_capacity,
            lifecycle,
            signal,
        } = self.config;
        signal.validate()?;
        if hub_config.tick_interval.is_zero() {
            return Err(PipelineError::ZeroTick);
        }
        let zero = self.devices.iter().find(|(_, interval)| interval.is_zero());
        if let Some((name, _)) = zero {
            return Err(PipelineError::ZeroInterval { name: name.clone() });
        }
        hub_config.lifecycle = lifecycle;

        // Keep the sink buffer proportional to the hub queue it drains.
        let buffer_capacity = BUFFER_BATCHES * hub_config.capacity.max(1);
        let sink = Sink::new(
            self.store,
            SinkConfig {
                wake_interval: hub_config.tick_interval,
                buffer_capacity,
                lifecycle,
            },
        );
        let hub = Hub::new(hub_config);
        let drain = hub.connect_sink(Arc::new(sink.inbox()));

        let mut registry = DeviceRegistry::with_capacity(registry_capacity);
        let requested = self.devices.len();
        let mut producers = Vec::with_capacity(requested);
        for (name, interval) in self.devices {
            let port: Arc<dyn MessagePort> = Arc::new(hub.connect_producer());
            let generator = SignalGenerator::with_config(&name, signal)?;
            producers.push(
                Producer::with_signal(name, interval, generator, port).with_lifecycle(lifecycle),
            );
        }
        let accepted = registry.add(producers);
        if accepted < requested {
            warn!(requested, accepted, "Some devices were not registered");
        }

        Ok(Pipeline {
            hub,
            sink,
            drain,
            registry,
        })
    }
}

pub struct Pipeline {
    hub: Hub,
    sink: Sink,
    drain: Drain,
    registry: DeviceRegistry,
}

impl Pipeline {
    pub fn builder(store: Box<dyn Persist>) -> PipelineBuilder {
        PipelineBuilder::new(store)
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub fn drain(&self) -> &Drain {
        &self.drain
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Start the sink, then the hub, then every producer. If the sink or
    /// the hub cannot start, whatever already started is stopped again and
    /// no producer is started.
    pub fn start(&self) -> Result<(), PipelineError> {
        if self.sink.start() == StartOutcome::SpawnFailed {
            return Err(PipelineError::SpawnFailed { component: "sink" });
        }
        let hub = match self.hub.start() {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Hub failed to start; stopping sink");
                self.sink.stop();
                return Err(e.into());
            }
        };
        if hub == StartOutcome::SpawnFailed {
            error!("Hub ticker failed to spawn; stopping sink");
            self.sink.stop();
            return Err(PipelineError::SpawnFailed { component: "hub" });
        }

        let outcomes = self.registry.start_all();
        let failed = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    StartOutcome::SpawnFailed | StartOutcome::InvalidInterval
                )
            })
            .count();
        if failed > 0 {
            warn!(failed, devices = outcomes.len(), "Some producers did not start");
        }
        info!(devices = self.registry.len() - failed, "Pipeline running");
        Ok(())
    }

    /// Stop producers, then the hub (which drains one last time), then the
    /// sink (which persists what it still holds).
    pub fn shutdown(&self) {
        let stalled = self
            .registry
            .stop_all()
            .into_iter()
            .filter(|o| *o == StopOutcome::StillRunning)
            .count();
        if stalled > 0 {
            warn!(stalled, "Some producers did not stop in time");
        }
        if self.hub.stop() == StopOutcome::StillRunning {
            warn!("Hub ticker did not stop in time");
        }
        if self.sink.stop() == StopOutcome::StillRunning {
            warn!("Sink did not stop in time");
        }
        let hub = self.hub.stats();
        let sink = self.sink.stats();
        info!(
            enqueued = hub.enqueued,
            rejected = hub.rejected,
            persisted = sink.messages_persisted,
            dropped = sink.messages_dropped,
            "Pipeline stopped"
        );
    }
}
