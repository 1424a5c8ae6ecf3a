//! Messages exchanged between producers, the hub and the sink.
//!
//! A [`Message`] carries a kind tag and a JSON payload. Readout messages wrap
//! a serialized [`Reading`]; lifecycle messages wrap a [`DeviceStatus`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Producer worker started
    DeviceOnline,
    /// Producer worker exited
    DeviceOffline,
    /// Periodic measurement
    DeviceReadout,
    /// Measurement that hit the signal bounds and was reflected
    DeviceOutOfRange,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceOnline => "DEVICE_ONLINE",
            Self::DeviceOffline => "DEVICE_OFFLINE",
            Self::DeviceReadout => "DEVICE_READOUT",
            Self::DeviceOutOfRange => "DEVICE_OUT_OF_RANGE",
        }
    }

    /// Kinds whose payload is a [`Reading`].
    pub fn carries_reading(&self) -> bool {
        matches!(self, Self::DeviceReadout | Self::DeviceOutOfRange)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped measurement from a single device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub device_name: String,
    /// Sample formatted with four decimals
    pub value: String,
    pub interval_ms: u64,
    /// Unix seconds with six decimals
    pub posix_timestamp: String,
}

impl Reading {
    /// Timestamp in microseconds, if the string is well formed.
    pub fn unix_us(&self) -> Option<u64> {
        parse_posix_us(&self.posix_timestamp)
    }
}

/// Payload of online/offline notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_name: String,
    pub interval_ms: u64,
    pub posix_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    pub fn readout(reading: &Reading) -> Result<Self, serde_json::Error> {
        Self::encode(MessageKind::DeviceReadout, reading)
    }

    pub fn out_of_range(reading: &Reading) -> Result<Self, serde_json::Error> {
        Self::encode(MessageKind::DeviceOutOfRange, reading)
    }

    pub fn status(kind: MessageKind, status: &DeviceStatus) -> Result<Self, serde_json::Error> {
        Self::encode(kind, status)
    }

    fn encode<T: Serialize>(kind: MessageKind, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            payload: serde_json::to_string(body)?,
        })
    }

    /// Decode the payload as a reading. `None` for lifecycle messages or
    /// malformed payloads.
    pub fn reading(&self) -> Option<Reading> {
        if !self.kind.carries_reading() {
            return None;
        }
        serde_json::from_str(&self.payload).ok()
    }

    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self.kind {
            MessageKind::DeviceOnline | MessageKind::DeviceOffline => {
                serde_json::from_str(&self.payload).ok()
            }
            _ => None,
        }
    }
}

fn parse_posix_us(ts: &str) -> Option<u64> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: u64 = secs.parse().ok()?;
    let mut micros: u64 = 0;
    let mut digits = 0;
    for c in frac.chars().take(6) {
        micros = micros * 10 + c.to_digit(10)? as u64;
        digits += 1;
    }
    for _ in digits..6 {
        micros *= 10;
    }
    Some(secs * 1_000_000 + micros)
}
