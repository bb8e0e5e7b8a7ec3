//! Test helpers and fixtures for cadenza integration tests
//!
//! Hosts are built with a small block size so a full cycle can be checked sample by
//! sample, and use the in-process plugins from `cadenza_plugin::testing`.

#![allow(dead_code)]

use cadenza::prelude::*;
use cadenza::plugin::EventUrids;
use std::path::Path;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Block size for deterministic testing
pub const TEST_BLOCK_SIZE: u32 = 256;

/// Event capacity used by test hosts.
pub const TEST_EVENT_CAPACITY: u32 = 1024;

/// Floating point rounding errors (for passthrough, exact gain).
pub const FLOAT_EPSILON: f32 = 1e-6;

pub fn test_config() -> HostConfig {
    HostConfig {
        sample_rate: TEST_SAMPLE_RATE,
        max_block_size: TEST_BLOCK_SIZE,
        event_buffer_capacity: TEST_EVENT_CAPACITY,
    }
}

/// Host without a plugins directory.
pub fn test_host() -> PluginHost {
    PluginHost::builder()
        .config(test_config())
        .build()
        .expect("Failed to create test host")
}

/// Host saving state under `dir`.
pub fn test_host_in(dir: &Path) -> PluginHost {
    PluginHost::builder()
        .config(test_config())
        .plugins_dir(dir)
        .build()
        .expect("Failed to create test host")
}

/// Event ids of a fresh host-side URI map.
pub fn event_urids(map: &UriMap) -> EventUrids {
    EventUrids::from(&cadenza::HostUris::new(map))
}

/// Integer staircase [0, 1, 2, ..., n-1] as f32, for exact sample verification.
pub fn generate_integer_staircase(num_samples: usize) -> Vec<f32> {
    (0..num_samples).map(|i| i as f32).collect()
}

/// Peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that a signal is silent.
pub fn assert_silence(samples: &[f32]) {
    let max = peak(samples);
    assert!(max == 0.0, "Expected silence, but peak amplitude was {}", max);
}
