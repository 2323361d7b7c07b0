// Telemetry decoding
// Decoded flight-controller messages: a type tag, named numeric fields and
// the onboard clock (microseconds since boot) when the message carries one.

pub mod dataflash;

#[cfg(test)]
pub(crate) mod fixtures;

use std::collections::BTreeMap;
use serde::Serialize;

pub use dataflash::{DataFlashReader, DecodeStats};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogMessage {
    pub msg_type: String,
    pub time_us: Option<u64>,
    pub fields: BTreeMap<String, f64>,
}

impl LogMessage {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            time_us: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_time_us(mut self, time_us: u64) -> Self {
        self.time_us = Some(time_us);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Numeric field by name, if the message carries it
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}
