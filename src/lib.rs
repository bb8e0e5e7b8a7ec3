//! # Cadenza - Real-time Plugin Hosting
//!
//! Loads LV2-style audio/MIDI plugins and runs them inside a real-time audio callback.
//!
//! ## Architecture
//!
//! Cadenza is an umbrella crate that coordinates:
//! - **cadenza-core** - URI interning, host configuration, lock-free control values
//! - **cadenza-plugin** - Event buffers, port tables, plugin instances, state, LV2 loading
//!
//! ## Quick Start
//!
//! ```ignore
//! use cadenza::prelude::*;
//!
//! let host = PluginHost::builder()
//!     .sample_rate(48000.0)
//!     .max_block_size(256)
//!     .build()?;
//!
//! host.load_library("/usr/lib/lv2/amp.lv2/amp.so", [(metadata, ports)])?;
//! let mut amp = host.instantiate("http://lv2plug.in/plugins/eg-amp")?;
//!
//! let gain = amp.control_handle();
//! gain.set_by_symbol("gain", -6.0);
//!
//! amp.activate();
//! amp.connect_and_run(io, 256, 0)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - `std` and `ffi`
//! - `ffi` - Load plugin shared libraries
//! - `test-utils` - In-process test plugins

/// Re-export of cadenza-core for direct access
pub use cadenza_core as core;

/// Re-export of cadenza-plugin for direct access
pub use cadenza_plugin as plugin;

pub use cadenza_core::{uris, AtomicFloat, HostConfig, HostUris, UriMap, Urid};

pub use cadenza_plugin::{
    BufferSet, ChannelMap, ControlHandle, Event, EventBuffer, EventFormat, EventOverflow,
    InstanceSnapshot, Lifecycle, LoadStage, NativePlugin, PluginError, PluginFactory,
    PluginInstance, PluginMetadata, PluginRegistry, PluginState, PortDescriptor, PortInfo,
    PortKind, PortTable, ProcessError, ProcessIo, ScratchBuffers, StateError, StateFlags,
};

#[cfg(feature = "ffi")]
pub use cadenza_plugin::Lv2Library;

mod error;
pub use error::{Error, Result};

mod builder;
mod host;

pub use builder::PluginHostBuilder;
pub use host::PluginHost;

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{PluginHost, PluginHostBuilder};

    pub use crate::{HostConfig, UriMap};

    pub use crate::{
        BufferSet, ChannelMap, ControlHandle, EventFormat, PluginInstance, PluginMetadata,
        PortInfo, ProcessIo, ScratchBuffers,
    };
}
