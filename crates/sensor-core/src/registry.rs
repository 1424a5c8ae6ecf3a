//! Bank of producers with fan-out lifecycle control.

use crate::lifecycle::{StartOutcome, StopOutcome};
use crate::producer::Producer;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const N_MAX_SENSORS: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Device {name} is not in this bank")]
    NotFound { name: String },

    #[error("Invalid index {index}; bank holds {len} devices")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Bank limit reached: {capacity} devices max")]
    CapacityReached { capacity: usize },

    #[error("Device {name} is already registered")]
    DuplicateName { name: String },
}

/// Ordered collection of producers with unique names.
///
/// Capacity is inclusive: once `len() == capacity` further devices are
/// rejected.
pub struct DeviceRegistry {
    producers: Vec<Producer>,
    capacity: usize,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::with_capacity(N_MAX_SENSORS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            producers: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Producer> {
        self.producers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.producers.iter().map(Producer::name).collect()
    }

    /// Register one device.
    pub fn try_add(&mut self, producer: Producer) -> Result<(), RegistryError> {
        if self.producers.len() >= self.capacity {
            warn!(capacity = self.capacity, device = %producer.name(), "Bank limit reached");
            return Err(RegistryError::CapacityReached {
                capacity: self.capacity,
            });
        }
        if self.find_by_name(producer.name()).is_some() {
            warn!(device = %producer.name(), "Duplicate device name rejected");
            return Err(RegistryError::DuplicateName {
                name: producer.name().to_string(),
            });
        }
        self.producers.push(producer);
        Ok(())
    }

    /// Register devices in order until the bank is full. Returns how many
    /// were accepted; rejected devices are dropped.
    pub fn add<I>(&mut self, devices: I) -> usize
    where
        I: IntoIterator<Item = Producer>,
    {
        let mut accepted = 0;
        for producer in devices {
            match self.try_add(producer) {
                Ok(()) => accepted += 1,
                Err(RegistryError::CapacityReached { .. }) => break,
                Err(_) => {}
            }
        }
        accepted
    }

    pub fn find_by_name(&self, name: &str) -> Option<(usize, &Producer)> {
        let found = self
            .producers
            .iter()
            .enumerate()
            .find(|(_, p)| p.name() == name);
        if found.is_none() {
            debug!(device = %name, "Device is not in this bank");
        }
        found
    }

    fn lookup(&self, name: &str) -> Result<&Producer, RegistryError> {
        match self.find_by_name(name) {
            Some((_, producer)) => Ok(producer),
            None => {
                warn!(device = %name, "Device is not in this bank");
                Err(RegistryError::NotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    fn at(&self, index: usize) -> Result<&Producer, RegistryError> {
        self.producers.get(index).ok_or_else(|| {
            warn!(index, len = self.producers.len(), "Invalid device index");
            RegistryError::IndexOutOfRange {
                index,
                len: self.producers.len(),
            }
        })
    }

    /// Stop the device and take it out of the bank.
    pub fn remove_by_name(&mut self, name: &str) -> Result<Producer, RegistryError> {
        let Some((index, _)) = self.find_by_name(name) else {
            warn!(device = %name, "Cannot remove: device is not in this bank");
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        };
        let producer = self.producers.remove(index);
        producer.stop();
        info!(device = %name, "Device removed from bank");
        Ok(producer)
    }

    pub fn start_by_name(&self, name: &str) -> Result<StartOutcome, RegistryError> {
        self.lookup(name).map(Producer::start)
    }

    pub fn stop_by_name(&self, name: &str) -> Result<StopOutcome, RegistryError> {
        self.lookup(name).map(Producer::stop)
    }

    pub fn start_by_index(&self, index: usize) -> Result<StartOutcome, RegistryError> {
        self.at(index).map(Producer::start)
    }

    pub fn stop_by_index(&self, index: usize) -> Result<StopOutcome, RegistryError> {
        self.at(index).map(Producer::stop)
    }

    pub fn start_all(&self) -> Vec<StartOutcome> {
        self.producers.iter().map(Producer::start).collect()
    }

    pub fn stop_all(&self) -> Vec<StopOutcome> {
        self.producers.iter().map(Producer::stop).collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a DeviceRegistry {
    type Item = &'a Producer;
    type IntoIter = std::slice::Iter<'a, Producer>;

    fn into_iter(self) -> Self::IntoIter {
        self.producers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{HubError, MessagePort};
    use crate::lifecycle::LifecycleState;
    use crate::message::Message;
    use std::sync::Arc;
    use std::time::Duration;

    struct Discard;

    impl MessagePort for Discard {
        fn enqueue(&self, _message: Message) -> Result<(), HubError> {
            Ok(())
        }
    }

    fn device(name: &str) -> Producer {
        Producer::new(name, Duration::from_secs(60), Arc::new(Discard))
    }

    fn bank(names: &[&str]) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.add(names.iter().map(|n| device(n)));
        registry
    }

    #[test]
    fn find_by_name_returns_index() {
        let registry = bank(&["a", "b", "c"]);
        let (index, producer) = registry.find_by_name("b").unwrap();
        assert_eq!(index, 1);
        assert_eq!(producer.name(), "b");
        assert!(registry.find_by_name("z").is_none());
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = bank(&["a"]);
        assert_eq!(
            registry.try_add(device("a")),
            Err(RegistryError::DuplicateName { name: "a".into() })
        );
        assert_eq!(registry.add([device("a"), device("b")]), 1);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn lookups_fail_softly() {
        let registry = bank(&["a"]);
        assert_eq!(
            registry.start_by_name("missing"),
            Err(RegistryError::NotFound {
                name: "missing".into()
            })
        );
        assert_eq!(
            registry.stop_by_index(3),
            Err(RegistryError::IndexOutOfRange { index: 3, len: 1 })
        );
    }

    #[test]
    fn start_and_stop_by_index_and_name() {
        let registry = bank(&["a", "b"]);
        assert_eq!(registry.start_by_index(0), Ok(StartOutcome::Started));
        assert_eq!(registry.start_by_name("a"), Ok(StartOutcome::AlreadyRunning));
        assert_eq!(registry.stop_by_name("a"), Ok(StopOutcome::Stopped));
        assert_eq!(registry.stop_by_index(1), Ok(StopOutcome::NotRunning));
    }

    #[test]
    fn remove_stops_the_device() {
        let mut registry = bank(&["a", "b"]);
        registry.start_all();
        let removed = registry.remove_by_name("a").unwrap();
        assert_eq!(removed.state(), LifecycleState::Stopped);
        assert_eq!(registry.names(), vec!["b"]);
        assert!(registry.remove_by_name("a").is_err());
        registry.stop_all();
    }
}
