//! Real-time LV2-style plugin hosting for cadenza
//!
//! Loads plugins through a [`PluginFactory`], describes their ports in a shared
//! [`PortTable`], and runs them block by block through a [`PluginInstance`] that owns the
//! control shadows and event buffers. Plugin state is saved to a chunked RIFF container.
//!
//! ## Usage
//!
//! ```ignore
//! use cadenza_plugin::{PluginRegistry, Lv2Library, PluginMetadata, PortInfo};
//!
//! let library = Lv2Library::open("/usr/lib/lv2/amp.lv2/amp.so")?;
//! let ports = vec![
//!     PortInfo::control_input(0, "gain").range(-90.0, 24.0, 0.0),
//!     PortInfo::audio_input(1, "in"),
//!     PortInfo::audio_output(2, "out"),
//! ];
//! let registry = PluginRegistry::new();
//! registry.register(library.factory(PluginMetadata::new("http://lv2plug.in/plugins/eg-amp", "Amp"), ports)?);
//!
//! let mut amp = registry.instantiate("http://lv2plug.in/plugins/eg-amp", &config, uri_map)?;
//! amp.activate();
//! amp.run(256)?;
//! ```

pub mod error;
pub use error::{EventOverflow, LoadStage, PluginError, ProcessError, Result, StateError};

pub mod evbuf;
pub use evbuf::{Event, EventBuffer, EventFormat, EventIter, EventUrids, PortEvents};

mod metadata;
pub use metadata::PluginMetadata;

pub mod port;
pub use port::{
    ParameterDescriptor, PortDescriptor, PortDirection, PortInfo, PortKind, PortProperties,
    PortTable, ScalePoint,
};

mod native;
pub use native::{Extension, HostFeatures, NativePlugin, PluginFactory, PortPtr};

mod io;
pub use io::{BufferSet, ChannelMap, ProcessIo, ScratchBuffers};

mod instance;
pub use instance::{ControlHandle, Lifecycle, PluginInstance};

pub mod state;
pub use state::{
    InstanceSnapshot, PluginState, PortValue, StateFlags, StateInterface, StatePaths,
    StateRecord, StateSink, StateSource, StateValue,
};

mod registry;
pub use registry::PluginRegistry;

#[cfg(feature = "ffi")]
pub mod ffi;
#[cfg(feature = "ffi")]
pub use ffi::{ForeignFactory, ForeignPlugin, Lv2Library};

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
