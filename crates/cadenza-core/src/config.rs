//! Host configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest process block a host may request from a plugin.
pub const MAX_BLOCK_SIZE_LIMIT: u32 = 16384;

/// Smallest event buffer that still holds a useful number of MIDI events.
pub const MIN_EVENT_CAPACITY: u32 = 64;

/// Configuration shared by every plugin instance a host creates.
///
/// All values are fixed for the lifetime of an instance: port bounds are scaled by
/// `sample_rate` when the port table is built, and event buffers are allocated with
/// `event_buffer_capacity` bytes once at instantiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub sample_rate: f64,
    /// Upper bound for `nframes` in a single `run()` call.
    pub max_block_size: u32,
    /// Byte capacity of each event port buffer (excluding its header).
    pub event_buffer_capacity: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            max_block_size: 1024,
            event_buffer_capacity: 8192,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8000.0..=384000.0).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "max_block_size {} out of range (1-{})",
                self.max_block_size, MAX_BLOCK_SIZE_LIMIT
            )));
        }
        if self.event_buffer_capacity < MIN_EVENT_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "event_buffer_capacity {} below minimum of {} bytes",
                self.event_buffer_capacity, MIN_EVENT_CAPACITY
            )));
        }
        Ok(())
    }
}
